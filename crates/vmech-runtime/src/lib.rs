//! `vmech-runtime` – the live mechanism collection
//!
//! Owns the set of virtual mechanisms a robot is guided by and turns them into
//! one force command per control cycle, while operators add, remove, retrain
//! and cluster mechanisms on the side.
//!
//! # Modules
//!
//! - [`manager`] – [`MechanismManager`]: the real-time `update` path
//!   (per-mechanism update, activation automaton, fade, blending) and the
//!   lifecycle API.  `update` never blocks: when the bank is busy it serves
//!   the previous cycle's force.
//! - [`lifecycle`] – [`LifecycleWorker`][lifecycle::LifecycleWorker]: a
//!   private Tokio runtime executing fitting, file I/O and clustering, with
//!   cancellable [`PendingOp`] handles.
//! - [`arena`] – [`SlotArena`][arena::SlotArena]: ordered storage addressed
//!   by positional index or by generation-checked
//!   [`MechanismHandle`][vmech_types::MechanismHandle].
//! - [`previous`] – [`PreviousCycle`][previous::PreviousCycle]: lock-free
//!   observables of the last completed cycle.
//! - [`config`] – [`ManagerConfig`] and the `~/.vmech/config.toml` vault.
//! - [`telemetry`] – [`init_tracing`]: `tracing` subscriber with optional
//!   OTLP export.
//!
//! # Threading
//!
//! Exactly one thread calls [`MechanismManager::update`].  Any number of
//! threads may call queries and lifecycle operations; queries take the bank
//! lock briefly and must not be issued from the real-time thread.

pub mod arena;
pub mod config;
pub mod lifecycle;
pub mod manager;
pub mod previous;
mod slot;
pub mod telemetry;

pub use config::ManagerConfig;
pub use lifecycle::{CancelFlag, PendingOp};
pub use manager::{ClusterOutcome, CycleReport, MechanismManager};
pub use telemetry::{TracerProviderGuard, init_tracing};

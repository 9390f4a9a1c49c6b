//! `vmech-kernel` – real-time building blocks.
//!
//! Nothing in this crate allocates, blocks, or performs I/O after
//! construction; every type here is safe to drive from the control loop.
//!
//! # Modules
//!
//! - [`automaton`] – [`VirtualMechanismAutom`][automaton::VirtualMechanismAutom]:
//!   the per-mechanism MANUAL → PREAUTO → AUTO activation state machine with
//!   hysteresis between its two phase-rate thresholds.
//! - [`fade`] – [`FadeFilter`][fade::FadeFilter]: first-order gain that ramps
//!   a mechanism's contribution in and out around activation edges.
//! - [`blend`] – [`blend`][blend::blend]: the HARD / SOFT / POTENTIAL
//!   reduction of per-mechanism forces into one command.

pub mod automaton;
pub mod blend;
pub mod fade;

pub use automaton::{AutomState, AutomatonConfig, VirtualMechanismAutom};
pub use blend::{BlendSummary, Contribution, blend};
pub use fade::FadeFilter;

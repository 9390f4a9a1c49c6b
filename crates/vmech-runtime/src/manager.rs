//! [`MechanismManager`] – the real-time orchestration layer.
//!
//! The manager owns an ordered bank of mechanism slots behind one mutex and
//! exposes two kinds of entry points:
//!
//! * **Real-time**: [`MechanismManager::update`] is called once per control
//!   cycle.  It only ever *tries* to take the bank lock; when a lifecycle
//!   worker holds it, the cycle is served from the previous cycle's
//!   published force instead of waiting.
//! * **Lifecycle**: insertion, deletion, retraining, saving, clustering and
//!   renaming are handed to the [`LifecycleWorker`].  Workers do all
//!   expensive work (fitting, cloning, file I/O) off to the side and take
//!   the lock only for the final splice.
//!
//! Deletion is two-phase: the slot is first marked retiring so its fade
//! filter ramps the contribution down on the real-time thread, then the
//! worker removes it once the fade has reached zero (or after
//! `retire_timeout_ms`).  Removed mechanisms are dropped outside the lock.
//!
//! Positional indices follow the bank order and shift down on removal;
//! [`MechanismHandle`]s stay valid until their mechanism is removed.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use vmech_kernel::{Contribution, blend};
use vmech_model::{Demonstration, VirtualMechanism, fit_mechanism, load_mechanism};
use vmech_types::{BlendMode, MechanismError, MechanismHandle, MechanismStatus};

use crate::arena::SlotArena;
use crate::config::ManagerConfig;
use crate::lifecycle::{CancelFlag, LifecycleWorker, PendingOp};
use crate::previous::PreviousCycle;
use crate::slot::MechanismSlot;

/// How often a deletion re-checks the published fade of a retiring slot.
const RETIRE_POLL: Duration = Duration::from_millis(2);

/// Extra time granted to running jobs on [`MechanismManager::stop`].
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Outcome of one [`MechanismManager::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    /// The bank was busy and the previous force was reused.
    pub stale: bool,
    /// Mechanisms in the bank, retiring ones included.
    pub mechanisms: usize,
    /// Mechanisms allowed to contribute this cycle.
    pub on_guide: usize,
    /// Mechanisms with a non-zero fade.
    pub candidates: usize,
    /// Index of the HARD winner.
    pub winner: Option<usize>,
}

/// Result of [`MechanismManager::cluster`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusterOutcome {
    /// The demonstration was folded into an existing mechanism.
    Merged {
        handle: MechanismHandle,
        responsibility: f64,
    },
    /// No mechanism was responsible enough; a new one was fitted.
    Created {
        handle: MechanismHandle,
        best_responsibility: f64,
    },
}

struct Bank {
    slots: SlotArena<MechanismSlot>,
}

impl Bank {
    /// One control cycle over every slot.  Writes the blended force into
    /// `f_out`.
    #[allow(clippy::too_many_arguments)]
    fn step(
        &mut self,
        cfg: &ManagerConfig,
        position: &[f64],
        velocity: &[f64],
        dt: f64,
        mode: BlendMode,
        collision: bool,
        f_out: &mut [f64],
    ) -> CycleReport {
        let mut scale_sum = 0.0;
        for (_, slot) in self.slots.iter_mut() {
            slot.mechanism.update(position, velocity, dt);
            let scale = slot.mechanism.scale(position, cfg.convergence_factor);
            slot.scale = if scale.is_finite() { scale.clamp(0.0, 1.0) } else { 0.0 };
            if !slot.retiring {
                scale_sum += slot.scale;
            }
        }

        let mut on_guide = 0;
        for (_, slot) in self.slots.iter_mut() {
            slot.responsibility = if !slot.retiring && scale_sum > 0.0 {
                slot.scale / scale_sum
            } else {
                0.0
            };
            if slot.automaton.override_active() != collision {
                slot.automaton.set_override(collision);
            }
            slot.automaton.step(
                slot.mechanism.phase_dot(),
                slot.mechanism.phase_dot_ref(),
                slot.responsibility,
            );
            let active = !slot.retiring && (!cfg.gate_on_automaton || slot.automaton.on_guide());
            if active {
                on_guide += 1;
            }
            slot.fade.step(active, dt);
            slot.active = active;
            slot.publish_fade();
            slot.compute_force(position, velocity);
        }

        let summary = blend(
            mode,
            self.slots.iter().map(|(_, s)| Contribution {
                force: &s.force,
                scale: s.scale,
                fade: s.fade.value(),
                active: s.active,
            }),
            f_out,
        );
        CycleReport {
            stale: false,
            mechanisms: self.slots.len(),
            on_guide,
            candidates: summary.candidates,
            winner: summary.winner,
        }
    }
}

struct Shared {
    config: ManagerConfig,
    bank: Mutex<Bank>,
    previous: PreviousCycle,
    collision: AtomicBool,
}

/// Owner of the live mechanism collection.
///
/// Share it between the control loop and operator threads with an `Arc`.
///
/// The bank sits behind a plain, non-reentrant [`parking_lot::Mutex`].
/// Every query and lifecycle job takes it for one short section and never
/// calls back into the manager while holding it, and [`update`] only
/// try-locks, so no thread can ask for the lock twice.  Do not issue
/// queries from the real-time thread: they block.
///
/// [`update`]: MechanismManager::update
pub struct MechanismManager {
    shared: Arc<Shared>,
    worker: LifecycleWorker,
}

impl MechanismManager {
    /// Validate `config` and start the lifecycle worker.
    pub fn new(config: ManagerConfig) -> Result<Self, MechanismError> {
        config.validate()?;
        let worker = LifecycleWorker::start(config.lifecycle_threads)?;
        info!(
            dim = config.position_dim,
            blend_mode = %config.blend_mode,
            "mechanism manager ready"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                previous: PreviousCycle::new(config.position_dim),
                bank: Mutex::new(Bank {
                    slots: SlotArena::new(),
                }),
                collision: AtomicBool::new(false),
                config,
            }),
            worker,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    pub fn position_dim(&self) -> usize {
        self.shared.config.position_dim
    }

    // ── Real-time path ───────────────────────────────────────────────────

    /// Advance every mechanism by `dt` and write the blended force into
    /// `f_out`.
    ///
    /// Never blocks: when a lifecycle worker holds the bank, `f_out`
    /// receives the previous cycle's force and the report is marked stale.
    /// An empty bank yields a zero force.  Non-finite results are replaced
    /// by zero.
    ///
    /// # Errors
    ///
    /// [`MechanismError::DimensionMismatch`] when `position`, `velocity` or
    /// `f_out` do not have [`ManagerConfig::position_dim`] entries, and
    /// [`MechanismError::InvalidTimeStep`] for a non-positive `dt`.  No state
    /// is touched in either case.
    pub fn update(
        &self,
        position: &[f64],
        velocity: &[f64],
        dt: f64,
        mode: BlendMode,
        f_out: &mut [f64],
    ) -> Result<CycleReport, MechanismError> {
        let dim = self.shared.config.position_dim;
        for actual in [position.len(), velocity.len(), f_out.len()] {
            if actual != dim {
                return Err(MechanismError::DimensionMismatch { expected: dim, actual });
            }
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(MechanismError::InvalidTimeStep(dt));
        }

        let Some(mut bank) = self.shared.bank.try_lock() else {
            let counts = self.shared.previous.read_into(f_out);
            let stale = self.shared.previous.record_stale();
            if stale.is_power_of_two() {
                warn!(stale_cycles = stale, "mechanism bank busy; reusing previous force");
            }
            return Ok(CycleReport {
                stale: true,
                mechanisms: counts.nb_mechanisms,
                on_guide: counts.on_guide,
                ..CycleReport::default()
            });
        };
        let collision = self.shared.collision.load(Ordering::Relaxed);
        let report = bank.step(&self.shared.config, position, velocity, dt, mode, collision, f_out);
        drop(bank);

        if f_out.iter().any(|f| !f.is_finite()) {
            f_out.fill(0.0);
        }
        self.shared.previous.publish(report.mechanisms, report.on_guide, f_out);
        Ok(report)
    }

    /// Assert or release the collision override on every automaton.  Takes
    /// effect on the next cycle.
    pub fn set_collision(&self, active: bool) {
        if self.shared.collision.swap(active, Ordering::Relaxed) != active {
            info!(active, "collision override changed");
        }
    }

    pub fn collision(&self) -> bool {
        self.shared.collision.load(Ordering::Relaxed)
    }

    // ── Previous-cycle observables (lock-free) ───────────────────────────

    pub fn nb_mechanisms_prev(&self) -> usize {
        self.shared.previous.counts().nb_mechanisms
    }

    pub fn nb_on_guide_prev(&self) -> usize {
        self.shared.previous.counts().on_guide
    }

    pub fn previous_force(&self) -> Vec<f64> {
        self.shared.previous.force()
    }

    /// Cycles served from the previous force because the bank was busy.
    pub fn stale_cycles(&self) -> u64 {
        self.shared.previous.stale_cycles()
    }

    // ── Queries (short blocking lock, never from the real-time thread) ──

    pub fn len(&self) -> usize {
        self.shared.bank.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handle_at(&self, index: usize) -> Result<MechanismHandle, MechanismError> {
        self.with_slot(index, |handle, _| handle)
    }

    pub fn index_of(&self, handle: MechanismHandle) -> Result<usize, MechanismError> {
        self.shared
            .bank
            .lock()
            .slots
            .index_of(handle)
            .ok_or(MechanismError::StaleHandle(handle))
    }

    /// Index of the first mechanism named `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.shared.bank.lock().slots.position(|s| s.mechanism.name() == name)
    }

    /// Whether the mechanism at `index` is in AUTO.
    pub fn on_guide(&self, index: usize) -> Result<bool, MechanismError> {
        self.with_slot(index, |_, s| s.automaton.on_guide())
    }

    /// Reference position of the mechanism at `index`.
    pub fn vm_position(&self, index: usize) -> Result<Vec<f64>, MechanismError> {
        self.with_slot(index, |_, s| s.mechanism.state().to_vec())
    }

    /// Reference velocity of the mechanism at `index`.
    pub fn vm_velocity(&self, index: usize) -> Result<Vec<f64>, MechanismError> {
        self.with_slot(index, |_, s| s.mechanism.state_dot().to_vec())
    }

    pub fn phase(&self, index: usize) -> Result<f64, MechanismError> {
        self.with_slot(index, |_, s| s.mechanism.phase())
    }

    pub fn phase_dot(&self, index: usize) -> Result<f64, MechanismError> {
        self.with_slot(index, |_, s| s.mechanism.phase_dot())
    }

    /// Scale computed during the last cycle.
    pub fn scale(&self, index: usize) -> Result<f64, MechanismError> {
        self.with_slot(index, |_, s| s.scale)
    }

    pub fn status(&self, index: usize) -> Result<MechanismStatus, MechanismError> {
        self.with_slot(index, |handle, s| s.status(index, handle))
    }

    pub fn status_of(&self, handle: MechanismHandle) -> Result<MechanismStatus, MechanismError> {
        let bank = self.shared.bank.lock();
        let index = bank.slots.index_of(handle).ok_or(MechanismError::StaleHandle(handle))?;
        bank.slots
            .at(index)
            .map(|s| s.status(index, handle))
            .ok_or(MechanismError::StaleHandle(handle))
    }

    /// Status of every mechanism, in index order.
    pub fn snapshot(&self) -> Vec<MechanismStatus> {
        let bank = self.shared.bank.lock();
        bank.slots
            .iter()
            .enumerate()
            .map(|(index, (handle, s))| s.status(index, handle))
            .collect()
    }

    fn with_slot<R>(
        &self,
        index: usize,
        f: impl FnOnce(MechanismHandle, &MechanismSlot) -> R,
    ) -> Result<R, MechanismError> {
        let bank = self.shared.bank.lock();
        match (bank.slots.handle_at(index), bank.slots.at(index)) {
            (Some(handle), Some(slot)) => Ok(f(handle, slot)),
            _ => Err(MechanismError::IndexOutOfRange {
                index,
                len: bank.slots.len(),
            }),
        }
    }

    fn resolve_name(&self, name: &str) -> Result<MechanismHandle, MechanismError> {
        let bank = self.shared.bank.lock();
        bank.slots
            .position(|s| s.mechanism.name() == name)
            .and_then(|index| bank.slots.handle_at(index))
            .ok_or_else(|| MechanismError::UnknownMechanism(name.to_string()))
    }

    fn check_demo(&self, demo: &Demonstration) -> Result<(), MechanismError> {
        let dim = self.position_dim();
        if demo.dim() != dim {
            return Err(MechanismError::DimensionMismatch {
                expected: dim,
                actual: demo.dim(),
            });
        }
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────
    //
    // Preconditions (index range, dimensions) are checked synchronously and
    // reported as `Err` before anything is queued.  Indices are resolved to
    // handles at call time, so later index shifts do not retarget a queued
    // operation.

    /// Splice an already constructed mechanism into the bank.
    pub fn insert_mechanism(
        &self,
        mechanism: Box<dyn VirtualMechanism>,
    ) -> Result<PendingOp<MechanismHandle>, MechanismError> {
        let dim = self.position_dim();
        if mechanism.dim() != dim {
            return Err(MechanismError::DimensionMismatch {
                expected: dim,
                actual: mechanism.dim(),
            });
        }
        let shared = Arc::clone(&self.shared);
        self.worker
            .submit("insert_mechanism", move |cancel| splice(&shared, mechanism, None, cancel))
    }

    /// Load a model file and splice it into the bank.
    pub fn insert_from_file(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<PendingOp<MechanismHandle>, MechanismError> {
        let path = path.into();
        let shared = Arc::clone(&self.shared);
        self.worker
            .submit("insert_from_file", move |cancel| insert_from_file_job(&shared, path, cancel))
    }

    /// Fit a new mechanism named `name` from `demo` and splice it in.
    pub fn insert_from_data(
        &self,
        name: &str,
        demo: Demonstration,
    ) -> Result<PendingOp<MechanismHandle>, MechanismError> {
        self.check_demo(&demo)?;
        let name = name.to_string();
        let shared = Arc::clone(&self.shared);
        self.worker
            .submit("insert_from_data", move |cancel| insert_from_data_job(&shared, name, demo, cancel))
    }

    /// Fade out and remove the mechanism at `index`.
    pub fn delete(&self, index: usize) -> Result<PendingOp<()>, MechanismError> {
        let handle = self.handle_at(index)?;
        self.delete_handle(handle)
    }

    /// Fade out and remove the first mechanism named `name`.
    pub fn delete_by_name(&self, name: &str) -> Result<PendingOp<()>, MechanismError> {
        let handle = self.resolve_name(name)?;
        self.delete_handle(handle)
    }

    pub fn delete_handle(&self, handle: MechanismHandle) -> Result<PendingOp<()>, MechanismError> {
        self.index_of(handle)?;
        let shared = Arc::clone(&self.shared);
        self.worker
            .submit("delete", move |cancel| delete_job(&shared, handle, cancel))
    }

    /// Fold `demo` into the mechanism at `index`.  The model is retrained on
    /// a copy and swapped in; on failure the live mechanism is untouched.
    pub fn retrain(&self, index: usize, demo: Demonstration) -> Result<PendingOp<()>, MechanismError> {
        self.check_demo(&demo)?;
        let handle = self.handle_at(index)?;
        let shared = Arc::clone(&self.shared);
        self.worker
            .submit("retrain", move |cancel| retrain_job(&shared, handle, demo, cancel))
    }

    /// Write the mechanism at `index` to `path`.
    pub fn save(
        &self,
        index: usize,
        path: impl Into<PathBuf>,
    ) -> Result<PendingOp<PathBuf>, MechanismError> {
        let handle = self.handle_at(index)?;
        let path = path.into();
        let shared = Arc::clone(&self.shared);
        self.worker
            .submit("save", move |_| save_job(&shared, handle, path))
    }

    /// Merge `demo` into the most responsible mechanism when its
    /// responsibility reaches [`ManagerConfig::cluster_threshold`], otherwise
    /// fit a new mechanism named `name`.
    pub fn cluster(
        &self,
        name: &str,
        demo: Demonstration,
    ) -> Result<PendingOp<ClusterOutcome>, MechanismError> {
        self.check_demo(&demo)?;
        let name = name.to_string();
        let shared = Arc::clone(&self.shared);
        self.worker
            .submit("cluster", move |cancel| cluster_job(&shared, name, demo, cancel))
    }

    pub fn rename(&self, index: usize, name: &str) -> Result<PendingOp<()>, MechanismError> {
        let handle = self.handle_at(index)?;
        let name = name.to_string();
        let shared = Arc::clone(&self.shared);
        self.worker
            .submit("rename", move |_| rename_job(&shared, handle, name))
    }

    /// Await several lifecycle operations from synchronous code.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> Result<F::Output, MechanismError> {
        self.worker.block_on(future)
    }

    /// Refuse new lifecycle operations and let the running ones finish.
    pub fn stop(&self) {
        let timeout = Duration::from_millis(self.shared.config.retire_timeout_ms) + STOP_GRACE;
        self.worker.stop(timeout);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle jobs (run on the worker's blocking pool)
// ─────────────────────────────────────────────────────────────────────────────

#[instrument(skip_all, fields(name = mechanism.name()))]
fn splice(
    shared: &Shared,
    mechanism: Box<dyn VirtualMechanism>,
    source: Option<PathBuf>,
    cancel: &CancelFlag,
) -> Result<MechanismHandle, MechanismError> {
    let slot = MechanismSlot::new(mechanism, source, &shared.config)?;
    cancel.check()?;
    let (handle, index) = {
        let mut bank = shared.bank.lock();
        let handle = bank.slots.insert(slot);
        (handle, bank.slots.len() - 1)
    };
    info!(%handle, index, "mechanism inserted");
    Ok(handle)
}

#[instrument(skip_all, fields(path = %path.display()))]
fn insert_from_file_job(
    shared: &Shared,
    path: PathBuf,
    cancel: &CancelFlag,
) -> Result<MechanismHandle, MechanismError> {
    let mechanism = load_mechanism(&path)?;
    cancel.check()?;
    splice(shared, mechanism, Some(path), cancel)
}

#[instrument(skip_all, fields(%name, samples = demo.len()))]
fn insert_from_data_job(
    shared: &Shared,
    name: String,
    demo: Demonstration,
    cancel: &CancelFlag,
) -> Result<MechanismHandle, MechanismError> {
    let cfg = &shared.config;
    let mechanism = fit_mechanism(cfg.mechanism_kind, &name, &demo, &cfg.mechanism)?;
    cancel.check()?;
    splice(shared, mechanism, None, cancel)
}

#[instrument(skip(shared, cancel))]
fn delete_job(
    shared: &Shared,
    handle: MechanismHandle,
    cancel: &CancelFlag,
) -> Result<(), MechanismError> {
    let fade = {
        let mut bank = shared.bank.lock();
        let slot = bank.slots.get_mut(handle).ok_or(MechanismError::StaleHandle(handle))?;
        slot.retiring = true;
        slot.fade_watch()
    };

    // The real-time thread keeps publishing the fade; watch it without
    // contending for the bank.
    let deadline = Instant::now() + Duration::from_millis(shared.config.retire_timeout_ms);
    loop {
        if fade.get() <= 0.0 {
            break;
        }
        if cancel.is_cancelled() {
            if let Some(slot) = shared.bank.lock().slots.get_mut(handle) {
                slot.retiring = false;
            }
            return Err(MechanismError::Cancelled);
        }
        if Instant::now() >= deadline {
            warn!(%handle, "fade-out timed out; removing mechanism while still contributing");
            break;
        }
        thread::sleep(RETIRE_POLL);
    }

    let removed = shared.bank.lock().slots.remove(handle);
    let slot = removed.ok_or(MechanismError::StaleHandle(handle))?;
    info!(%handle, name = slot.mechanism.name(), "mechanism removed");
    drop(slot);
    Ok(())
}

fn clone_mechanism(
    shared: &Shared,
    handle: MechanismHandle,
) -> Result<Box<dyn VirtualMechanism>, MechanismError> {
    shared
        .bank
        .lock()
        .slots
        .get(handle)
        .map(|s| s.mechanism.clone_box())
        .ok_or(MechanismError::StaleHandle(handle))
}

/// Swap `replacement` in at the live mechanism's current phase.
fn replace_mechanism(
    shared: &Shared,
    handle: MechanismHandle,
    mut replacement: Box<dyn VirtualMechanism>,
) -> Result<(), MechanismError> {
    let old = {
        let mut bank = shared.bank.lock();
        let slot = bank.slots.get_mut(handle).ok_or(MechanismError::StaleHandle(handle))?;
        replacement.set_phase(slot.mechanism.phase());
        std::mem::replace(&mut slot.mechanism, replacement)
    };
    debug!(%handle, name = old.name(), "mechanism replaced");
    Ok(())
}

#[instrument(skip(shared, demo, cancel), fields(samples = demo.len()))]
fn retrain_job(
    shared: &Shared,
    handle: MechanismHandle,
    demo: Demonstration,
    cancel: &CancelFlag,
) -> Result<(), MechanismError> {
    let mut candidate = clone_mechanism(shared, handle)?;
    candidate.retrain(&demo)?;
    cancel.check()?;
    replace_mechanism(shared, handle, candidate)
}

#[instrument(skip(shared, path), fields(path = %path.display()))]
fn save_job(
    shared: &Shared,
    handle: MechanismHandle,
    path: PathBuf,
) -> Result<PathBuf, MechanismError> {
    let snapshot = clone_mechanism(shared, handle)?;
    snapshot.save_to_file(&path)?;
    if let Some(slot) = shared.bank.lock().slots.get_mut(handle) {
        slot.source = Some(path.clone());
    }
    Ok(path)
}

#[instrument(skip(shared, demo, cancel), fields(samples = demo.len()))]
fn cluster_job(
    shared: &Shared,
    name: String,
    demo: Demonstration,
    cancel: &CancelFlag,
) -> Result<ClusterOutcome, MechanismError> {
    let candidates: Vec<(MechanismHandle, Box<dyn VirtualMechanism>)> = {
        let bank = shared.bank.lock();
        bank.slots
            .iter()
            .filter(|(_, s)| !s.retiring)
            .map(|(h, s)| (h, s.mechanism.clone_box()))
            .collect()
    };

    let mut best: Option<(f64, MechanismHandle, Box<dyn VirtualMechanism>)> = None;
    for (handle, mechanism) in candidates {
        cancel.check()?;
        let r = mechanism.responsibility(&demo);
        debug!(%handle, responsibility = r, "cluster candidate");
        if best.as_ref().is_none_or(|(b, _, _)| r > *b) {
            best = Some((r, handle, mechanism));
        }
    }

    match best {
        Some((r, handle, mut mechanism)) if r >= shared.config.cluster_threshold => {
            mechanism.retrain(&demo)?;
            cancel.check()?;
            replace_mechanism(shared, handle, mechanism)?;
            info!(%handle, responsibility = r, "demonstration merged");
            Ok(ClusterOutcome::Merged {
                handle,
                responsibility: r,
            })
        }
        other => {
            let best_responsibility = other.map_or(0.0, |(r, _, _)| r);
            let cfg = &shared.config;
            let mechanism = fit_mechanism(cfg.mechanism_kind, &name, &demo, &cfg.mechanism)?;
            cancel.check()?;
            let handle = splice(shared, mechanism, None, cancel)?;
            Ok(ClusterOutcome::Created {
                handle,
                best_responsibility,
            })
        }
    }
}

#[instrument(skip(shared))]
fn rename_job(shared: &Shared, handle: MechanismHandle, name: String) -> Result<(), MechanismError> {
    let mut bank = shared.bank.lock();
    let slot = bank.slots.get_mut(handle).ok_or(MechanismError::StaleHandle(handle))?;
    slot.mechanism.rename(&name);
    Ok(())
}

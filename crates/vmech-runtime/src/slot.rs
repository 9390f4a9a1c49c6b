//! One live mechanism with everything the real-time path needs next to it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use vmech_kernel::{FadeFilter, VirtualMechanismAutom};
use vmech_model::VirtualMechanism;
use vmech_types::{MechanismError, MechanismHandle, MechanismStatus};

use crate::config::ManagerConfig;

/// Lock-free view of a slot's fade value as of the last cycle.
#[derive(Debug, Clone)]
pub(crate) struct FadeWatch(Arc<AtomicU64>);

impl FadeWatch {
    fn new(value: f64) -> Self {
        Self(Arc::new(AtomicU64::new(value.to_bits())))
    }

    pub(crate) fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// A mechanism, its automaton, its fade filter and its per-cycle cache.
///
/// All buffers are sized at construction so the real-time path only writes
/// into them.
pub(crate) struct MechanismSlot {
    pub(crate) mechanism: Box<dyn VirtualMechanism>,
    pub(crate) automaton: VirtualMechanismAutom,
    pub(crate) fade: FadeFilter,
    pub(crate) source: Option<PathBuf>,
    /// Set by a pending deletion: the slot fades out and stops counting
    /// toward responsibility.
    pub(crate) retiring: bool,
    /// Whether the fade headed up during the last cycle.
    pub(crate) active: bool,
    pub(crate) scale: f64,
    pub(crate) responsibility: f64,
    pub(crate) force: Vec<f64>,
    error: Vec<f64>,
    published_fade: FadeWatch,
}

impl MechanismSlot {
    /// Wrap `mechanism` for a manager configured by `cfg`.
    ///
    /// # Errors
    ///
    /// [`MechanismError::DimensionMismatch`] when the mechanism, its
    /// stiffness or its damping do not fit `cfg.position_dim`.
    pub(crate) fn new(
        mechanism: Box<dyn VirtualMechanism>,
        source: Option<PathBuf>,
        cfg: &ManagerConfig,
    ) -> Result<Self, MechanismError> {
        let dim = cfg.position_dim;
        if mechanism.dim() != dim {
            return Err(MechanismError::DimensionMismatch {
                expected: dim,
                actual: mechanism.dim(),
            });
        }
        mechanism.stiffness().check_dim(dim)?;
        mechanism.damping().check_dim(dim)?;
        Ok(Self {
            mechanism,
            automaton: VirtualMechanismAutom::new(cfg.automaton)?,
            fade: FadeFilter::new(cfg.fade_gain),
            source,
            retiring: false,
            active: false,
            scale: 0.0,
            responsibility: 0.0,
            force: vec![0.0; dim],
            error: vec![0.0; dim],
            published_fade: FadeWatch::new(0.0),
        })
    }

    /// Mirror the current fade for [`FadeWatch`] readers.
    pub(crate) fn publish_fade(&self) {
        self.published_fade.set(self.fade.value());
    }

    pub(crate) fn fade_watch(&self) -> FadeWatch {
        self.published_fade.clone()
    }

    /// `f = K·(x_ref − x) + B·(ẋ_ref − ẋ)` into the cached force.
    pub(crate) fn compute_force(&mut self, position: &[f64], velocity: &[f64]) {
        self.force.fill(0.0);
        for ((e, r), x) in self.error.iter_mut().zip(self.mechanism.state()).zip(position) {
            *e = r - x;
        }
        self.mechanism.stiffness().apply_add(&self.error, &mut self.force);
        for ((e, r), v) in self.error.iter_mut().zip(self.mechanism.state_dot()).zip(velocity) {
            *e = r - v;
        }
        self.mechanism.damping().apply_add(&self.error, &mut self.force);
    }

    pub(crate) fn status(&self, index: usize, handle: MechanismHandle) -> MechanismStatus {
        MechanismStatus {
            index,
            handle,
            name: self.mechanism.name().to_string(),
            source: self.source.as_ref().map(|p| p.display().to_string()),
            phase: self.mechanism.phase(),
            phase_dot: self.mechanism.phase_dot(),
            scale: self.scale,
            responsibility: self.responsibility,
            fade: self.fade.value(),
            on_guide: self.automaton.on_guide(),
            retiring: self.retiring,
            position: self.mechanism.state().to_vec(),
            velocity: self.mechanism.state_dot().to_vec(),
        }
    }
}

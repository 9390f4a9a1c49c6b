//! `vmech-model` – the virtual mechanism capability.
//!
//! A virtual mechanism is a parametric dynamical model that produces a
//! reference trajectory the robot should be guided toward, together with a
//! confidence that the robot is actually following it.  The manager only
//! ever talks to the [`VirtualMechanism`] trait, so model variants can be
//! swapped without touching blending or lifecycle logic.
//!
//! # Modules
//!
//! - [`mechanism`] – the [`VirtualMechanism`] trait.
//! - [`demonstration`] – [`Demonstration`]: validated `N×D` sample matrices
//!   recorded from an operator or loaded from JSON.
//! - [`trajectory`] – [`Trajectory`]: an arc-length parametrised path model
//!   with per-axis spread, fitted from and merged with demonstrations.
//! - [`guide`] – [`GuideMechanism`]: the reference implementation, with a
//!   normalized or arc-length phase selected by [`PhaseMode`].
//! - [`persist`] – JSON model files and [`load_mechanism`].

pub mod demonstration;
pub mod guide;
pub mod mechanism;
pub mod persist;
pub mod trajectory;

pub use demonstration::Demonstration;
pub use guide::{GuideMechanism, GuideParams, PhaseMode};
pub use mechanism::VirtualMechanism;
pub use persist::{load_mechanism, save_mechanism};
pub use trajectory::Trajectory;

use serde::{Deserialize, Serialize};
use vmech_types::ModelError;

/// Mechanism variant selected when a model is fitted from data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MechanismKind {
    Guide(PhaseMode),
}

impl Default for MechanismKind {
    fn default() -> Self {
        MechanismKind::Guide(PhaseMode::Normalized)
    }
}

/// Fit a new mechanism of the requested `kind` from a demonstration.
///
/// This is the expensive path (resampling and model construction) and must
/// never run on the real-time thread.
pub fn fit_mechanism(
    kind: MechanismKind,
    name: &str,
    demo: &Demonstration,
    params: &GuideParams,
) -> Result<Box<dyn VirtualMechanism>, ModelError> {
    match kind {
        MechanismKind::Guide(mode) => Ok(Box::new(GuideMechanism::fit(name, mode, demo, params)?)),
    }
}

//! Generic `VirtualMechanism` trait for every guidance model variant.
//!
//! Models implement this trait and are handed to the mechanism manager as
//! `Box<dyn VirtualMechanism>`.  The manager calls [`VirtualMechanism::update`]
//! and the read-only accessors from the real-time thread; the remaining
//! methods (retraining, persistence, cloning) are only ever invoked by
//! background lifecycle workers.

use std::path::Path;

use vmech_types::{Gain, ModelError};

use crate::demonstration::Demonstration;

/// A phase-driven dynamical model producing a reference state for the robot.
///
/// Every position-space vector exchanged through this trait has length
/// [`VirtualMechanism::dim`].
pub trait VirtualMechanism: Send + Sync {
    /// Human-readable identifier, e.g. `"pick_left"`.
    fn name(&self) -> &str;

    fn rename(&mut self, name: &str);

    /// Position-space dimensionality `D`.
    fn dim(&self) -> usize;

    /// Advance the internal phase by one control cycle of `dt` seconds given
    /// the robot's current pose and velocity.
    ///
    /// Real-time path: implementations must not allocate, block, or perform
    /// I/O here.
    fn update(&mut self, robot_position: &[f64], robot_velocity: &[f64], dt: f64);

    /// Reference position at the current phase.
    fn state(&self) -> &[f64];

    /// Reference velocity at the current phase.
    fn state_dot(&self) -> &[f64];

    /// Current phase.
    fn phase(&self) -> f64;

    /// Current phase rate.
    fn phase_dot(&self) -> f64;

    /// Current phase acceleration.
    fn phase_ddot(&self) -> f64;

    /// Nominal phase rate when the trajectory is executed in its reference
    /// execution time.
    fn phase_dot_ref(&self) -> f64;

    /// Jump to `phase`, clamped to the model's phase range.
    fn set_phase(&mut self, phase: f64);

    /// Confidence in `[0, 1]` that `position` belongs to this mechanism.
    fn scale(&self, position: &[f64], convergence_factor: f64) -> f64;

    /// Non-negative discrepancy between `position` and the reference state.
    fn distance(&self, position: &[f64]) -> f64;

    fn stiffness(&self) -> &Gain;

    fn damping(&self) -> &Gain;

    /// Confidence in `[0, 1]` that a whole demonstration was produced by
    /// this mechanism.
    fn responsibility(&self, demo: &Demonstration) -> f64;

    /// Align `demo` with the model and fold it in.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the demonstration cannot be aligned (wrong
    /// dimension, degenerate path).  The model is left unchanged on error.
    fn retrain(&mut self, demo: &Demonstration) -> Result<(), ModelError>;

    /// Persist the model so that [`crate::load_mechanism`] can restore it.
    fn save_to_file(&self, path: &Path) -> Result<(), ModelError>;

    /// Deep copy, used by workers that refit a model off to the side.
    fn clone_box(&self) -> Box<dyn VirtualMechanism>;
}

impl Clone for Box<dyn VirtualMechanism> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal fixed-point mechanism used only for tests.
    #[derive(Clone)]
    struct FixedPoint {
        name: String,
        target: Vec<f64>,
        zero: Vec<f64>,
        gain: Gain,
    }

    impl VirtualMechanism for FixedPoint {
        fn name(&self) -> &str {
            &self.name
        }
        fn rename(&mut self, name: &str) {
            self.name = name.to_string();
        }
        fn dim(&self) -> usize {
            self.target.len()
        }
        fn update(&mut self, _: &[f64], _: &[f64], _: f64) {}
        fn state(&self) -> &[f64] {
            &self.target
        }
        fn state_dot(&self) -> &[f64] {
            &self.zero
        }
        fn phase(&self) -> f64 {
            1.0
        }
        fn phase_dot(&self) -> f64 {
            0.0
        }
        fn phase_ddot(&self) -> f64 {
            0.0
        }
        fn phase_dot_ref(&self) -> f64 {
            0.0
        }
        fn set_phase(&mut self, _: f64) {}
        fn scale(&self, position: &[f64], convergence_factor: f64) -> f64 {
            (-convergence_factor * self.distance(position)).exp()
        }
        fn distance(&self, position: &[f64]) -> f64 {
            position
                .iter()
                .zip(&self.target)
                .map(|(p, t)| (p - t) * (p - t))
                .sum::<f64>()
                .sqrt()
        }
        fn stiffness(&self) -> &Gain {
            &self.gain
        }
        fn damping(&self) -> &Gain {
            &self.gain
        }
        fn responsibility(&self, _: &Demonstration) -> f64 {
            0.0
        }
        fn retrain(&mut self, _: &Demonstration) -> Result<(), ModelError> {
            Ok(())
        }
        fn save_to_file(&self, _: &Path) -> Result<(), ModelError> {
            Ok(())
        }
        fn clone_box(&self) -> Box<dyn VirtualMechanism> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn boxed_mechanism_clones_deeply() {
        let original: Box<dyn VirtualMechanism> = Box::new(FixedPoint {
            name: "fixed".to_string(),
            target: vec![1.0, 2.0],
            zero: vec![0.0, 0.0],
            gain: Gain::Scalar(1.0),
        });
        let mut copy = original.clone();
        copy.rename("copy");
        assert_eq!(original.name(), "fixed");
        assert_eq!(copy.name(), "copy");
        assert_eq!(copy.state(), original.state());
        assert_eq!(copy.dim(), 2);
        assert!((copy.scale(&[1.0, 2.0], 1.0) - 1.0).abs() < 1e-12);
    }
}

//! [`GuideMechanism`] – trajectory-following virtual mechanism.
//!
//! The mechanism slides a reference point along a fitted [`Trajectory`].
//! Its phase is driven by the robot: every cycle the robot velocity and the
//! position error are projected onto the path tangent to obtain a target
//! phase rate, which is then low-pass filtered by the phase inertia:
//!
//! ```text
//! ṗ* = (J·ẋ_robot + k_p · J·(x_robot − x_ref)) / |J|²
//! ṗ  ← ṗ + (ṗ* − ṗ) · min(dt / inertia, 1)
//! p  ← clamp(p + ṗ·dt, 0, 1)
//! ```
//!
//! where `J = ∂x_ref/∂p`.  The exposed phase is `p` itself for
//! [`PhaseMode::Normalized`] and `p · L` (arc length travelled) for
//! [`PhaseMode::ArcLength`].
//!
//! # Example
//!
//! ```rust
//! use vmech_model::{Demonstration, GuideMechanism, GuideParams, PhaseMode, VirtualMechanism};
//!
//! let demo = Demonstration::from_rows(vec![vec![0.0, 0.0], vec![1.0, 0.0]]).unwrap();
//! let mut guide = GuideMechanism::fit("reach", PhaseMode::Normalized, &demo, &GuideParams::default()).unwrap();
//!
//! // Push the robot along the path: the phase follows.
//! guide.update(&[0.0, 0.0], &[0.5, 0.0], 0.01);
//! assert!(guide.phase_dot() > 0.0);
//! assert!((guide.scale(guide.state(), 1.0) - 1.0).abs() < 1e-12);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use vmech_types::{Gain, ModelError};

use crate::demonstration::Demonstration;
use crate::mechanism::VirtualMechanism;
use crate::trajectory::Trajectory;

/// How the phase of a [`GuideMechanism`] is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    /// Phase in `[0, 1]`.
    Normalized,
    /// Phase is the arc length travelled along the mean path.
    ArcLength,
}

/// Tuning of a guide mechanism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuideParams {
    /// Stiffness `K` pulling the robot toward the reference position.
    pub stiffness: Gain,
    /// Damping `B` on the reference velocity error.
    pub damping: Gain,
    /// Seconds needed to traverse the whole path at the reference rate.
    pub execution_time: f64,
    /// Time constant of the phase-rate filter, in seconds.  Zero disables
    /// filtering.
    pub inertia: f64,
    /// Gain of the position-error term in the target phase rate (1/s).
    pub phase_gain: f64,
    /// Number of points a demonstration is resampled to.
    pub resample_points: usize,
    /// Per-axis spread assumed until a second demonstration is merged.
    pub initial_spread: f64,
}

impl Default for GuideParams {
    fn default() -> Self {
        Self {
            stiffness: Gain::Scalar(300.0),
            damping: Gain::Scalar(30.0),
            execution_time: 5.0,
            inertia: 0.05,
            phase_gain: 5.0,
            resample_points: 100,
            initial_spread: 0.05,
        }
    }
}

impl GuideParams {
    /// Check these parameters for a `dim`-dimensional mechanism.
    pub fn validate(&self, dim: usize) -> Result<(), ModelError> {
        self.stiffness
            .check_dim(dim)
            .map_err(|e| ModelError::InvalidParameter(format!("stiffness: {e}")))?;
        self.damping
            .check_dim(dim)
            .map_err(|e| ModelError::InvalidParameter(format!("damping: {e}")))?;
        if !(self.execution_time.is_finite() && self.execution_time > 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "execution_time must be positive, got {}",
                self.execution_time
            )));
        }
        if !(self.inertia.is_finite() && self.inertia >= 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "inertia must be non-negative, got {}",
                self.inertia
            )));
        }
        if !self.phase_gain.is_finite() {
            return Err(ModelError::InvalidParameter("phase_gain must be finite".to_string()));
        }
        Ok(())
    }
}

/// Trajectory-following mechanism driven by the robot's motion.
#[derive(Debug, Clone)]
pub struct GuideMechanism {
    name: String,
    mode: PhaseMode,
    params: GuideParams,
    trajectory: Trajectory,
    // Normalized phase p ∈ [0, 1] and its derivatives.
    p: f64,
    p_dot: f64,
    p_ddot: f64,
    state: Vec<f64>,
    state_dot: Vec<f64>,
    tangent: Vec<f64>,
}

impl GuideMechanism {
    /// Fit a new mechanism from a demonstration.  The phase starts at zero.
    pub fn fit(
        name: &str,
        mode: PhaseMode,
        demo: &Demonstration,
        params: &GuideParams,
    ) -> Result<Self, ModelError> {
        params.validate(demo.dim())?;
        let trajectory = Trajectory::fit(demo, params.resample_points, params.initial_spread)?;
        Ok(Self::from_parts(name.to_string(), mode, params.clone(), trajectory))
    }

    /// Rebuild a mechanism from an already fitted trajectory.
    pub(crate) fn from_parts(
        name: String,
        mode: PhaseMode,
        params: GuideParams,
        trajectory: Trajectory,
    ) -> Self {
        let dim = trajectory.dim();
        let mut guide = Self {
            name,
            mode,
            params,
            trajectory,
            p: 0.0,
            p_dot: 0.0,
            p_ddot: 0.0,
            state: vec![0.0; dim],
            state_dot: vec![0.0; dim],
            tangent: vec![0.0; dim],
        };
        guide.refresh_state();
        guide
    }

    pub fn mode(&self) -> PhaseMode {
        self.mode
    }

    pub fn params(&self) -> &GuideParams {
        &self.params
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Factor converting the normalized phase into the reported phase.
    fn phase_span(&self) -> f64 {
        match self.mode {
            PhaseMode::Normalized => 1.0,
            PhaseMode::ArcLength => self.trajectory.length(),
        }
    }

    fn refresh_state(&mut self) {
        self.trajectory.sample(self.p, &mut self.state, &mut self.tangent);
        for (v, t) in self.state_dot.iter_mut().zip(&self.tangent) {
            *v = t * self.p_dot;
        }
    }
}

impl VirtualMechanism for GuideMechanism {
    fn name(&self) -> &str {
        &self.name
    }

    fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn dim(&self) -> usize {
        self.trajectory.dim()
    }

    fn update(&mut self, robot_position: &[f64], robot_velocity: &[f64], dt: f64) {
        let dim = self.dim();
        if !(dt > 0.0) || robot_position.len() != dim || robot_velocity.len() != dim {
            return;
        }

        let mut jj = 0.0;
        let mut j_vel = 0.0;
        let mut j_err = 0.0;
        for d in 0..dim {
            let j = self.tangent[d];
            jj += j * j;
            j_vel += j * robot_velocity[d];
            j_err += j * (robot_position[d] - self.state[d]);
        }
        let target = if jj > f64::EPSILON {
            (j_vel + self.params.phase_gain * j_err) / jj
        } else {
            0.0
        };

        let alpha = if self.params.inertia > 0.0 {
            (dt / self.params.inertia).min(1.0)
        } else {
            1.0
        };
        let mut p_dot = self.p_dot + (target - self.p_dot) * alpha;
        let mut p = self.p + p_dot * dt;
        if p >= 1.0 {
            p = 1.0;
            p_dot = p_dot.min(0.0);
        } else if p <= 0.0 {
            p = 0.0;
            p_dot = p_dot.max(0.0);
        }

        self.p_ddot = (p_dot - self.p_dot) / dt;
        self.p_dot = p_dot;
        self.p = p;
        self.refresh_state();
    }

    fn state(&self) -> &[f64] {
        &self.state
    }

    fn state_dot(&self) -> &[f64] {
        &self.state_dot
    }

    fn phase(&self) -> f64 {
        self.p * self.phase_span()
    }

    fn phase_dot(&self) -> f64 {
        self.p_dot * self.phase_span()
    }

    fn phase_ddot(&self) -> f64 {
        self.p_ddot * self.phase_span()
    }

    fn phase_dot_ref(&self) -> f64 {
        self.phase_span() / self.params.execution_time
    }

    fn set_phase(&mut self, phase: f64) {
        let span = self.phase_span();
        self.p = if span > 0.0 { (phase / span).clamp(0.0, 1.0) } else { 0.0 };
        self.refresh_state();
    }

    fn scale(&self, position: &[f64], convergence_factor: f64) -> f64 {
        let d = self.distance(position);
        (-0.5 * convergence_factor.max(0.0) * d * d).exp().clamp(0.0, 1.0)
    }

    fn distance(&self, position: &[f64]) -> f64 {
        self.trajectory.weighted_distance(position, &self.state)
    }

    fn stiffness(&self) -> &Gain {
        &self.params.stiffness
    }

    fn damping(&self) -> &Gain {
        &self.params.damping
    }

    fn responsibility(&self, demo: &Demonstration) -> f64 {
        self.trajectory.responsibility(demo)
    }

    fn retrain(&mut self, demo: &Demonstration) -> Result<(), ModelError> {
        self.trajectory.align_and_merge(demo)?;
        self.refresh_state();
        Ok(())
    }

    fn save_to_file(&self, path: &Path) -> Result<(), ModelError> {
        crate::persist::save_guide(self, path)
    }

    fn clone_box(&self) -> Box<dyn VirtualMechanism> {
        Box::new(self.clone())
    }
}

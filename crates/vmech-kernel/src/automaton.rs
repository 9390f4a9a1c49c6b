//! [`VirtualMechanismAutom`] – per-mechanism activation automaton.
//!
//! Decides whether a mechanism is *on guide*, i.e. allowed to push the
//! robot.  The input is the mechanism's phase rate, expressed as a ratio of
//! its reference rate so that one set of thresholds fits mechanisms with
//! different execution times, and its responsibility among all live
//! mechanisms.
//!
//! ```text
//!            rate > preauto_th              rate > th && r >= r_th
//!   MANUAL ───────────────────▶ PREAUTO ─────────────────────────▶ AUTO
//!      ▲                          │                                  │
//!      └──────── rate < preauto_th ┴──────── rate < preauto_th ───────┘
//! ```
//!
//! Between the two thresholds the state is held, which gives the hysteresis
//! that keeps noisy phase rates from chattering at the activation edge.  At
//! most one transition happens per [`VirtualMechanismAutom::step`].
//!
//! Asserting the override (e.g. a detected collision) drops the automaton
//! to MANUAL and keeps it there until released.

use serde::{Deserialize, Serialize};
use vmech_types::MechanismError;

/// Below this reference rate the raw phase rate is compared to the thresholds.
const MIN_REFERENCE_RATE: f64 = 1e-9;

/// Threshold configuration shared by every automaton of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomatonConfig {
    /// Lower threshold: leaving MANUAL and falling back to it.
    pub phase_dot_preauto_th: f64,
    /// Upper threshold: entering AUTO from PREAUTO.
    pub phase_dot_th: f64,
    /// Minimum responsibility, in `[0, 1]`, required to enter AUTO.
    pub r_th: f64,
}

impl Default for AutomatonConfig {
    fn default() -> Self {
        Self {
            phase_dot_preauto_th: 0.1,
            phase_dot_th: 0.3,
            r_th: 0.4,
        }
    }
}

impl AutomatonConfig {
    /// # Errors
    ///
    /// [`MechanismError::InvalidAutomaton`] when a threshold is negative or
    /// non-finite, when `phase_dot_th <= phase_dot_preauto_th`, or when
    /// `r_th` lies outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), MechanismError> {
        let finite_non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if !finite_non_negative(self.phase_dot_preauto_th) || !finite_non_negative(self.phase_dot_th) {
            return Err(MechanismError::InvalidAutomaton(format!(
                "thresholds must be finite and non-negative (preauto {}, auto {})",
                self.phase_dot_preauto_th, self.phase_dot_th
            )));
        }
        if self.phase_dot_th <= self.phase_dot_preauto_th {
            return Err(MechanismError::InvalidAutomaton(format!(
                "phase_dot_th {} must exceed phase_dot_preauto_th {}",
                self.phase_dot_th, self.phase_dot_preauto_th
            )));
        }
        if !(0.0..=1.0).contains(&self.r_th) {
            return Err(MechanismError::InvalidAutomaton(format!(
                "r_th {} outside [0, 1]",
                self.r_th
            )));
        }
        Ok(())
    }
}

/// Activation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomState {
    Manual,
    PreAuto,
    Auto,
}

/// The activation automaton owned by one mechanism slot.
#[derive(Debug, Clone)]
pub struct VirtualMechanismAutom {
    config: AutomatonConfig,
    state: AutomState,
    override_active: bool,
}

impl VirtualMechanismAutom {
    /// Create an automaton in the MANUAL state.
    pub fn new(config: AutomatonConfig) -> Result<Self, MechanismError> {
        config.validate()?;
        Ok(Self {
            config,
            state: AutomState::Manual,
            override_active: false,
        })
    }

    /// Advance one control cycle and return the new state.
    ///
    /// `phase_dot_ref` normalizes `phase_dot` when positive; `r` is the
    /// mechanism's responsibility.  Non-finite inputs count as a stopped
    /// mechanism.
    pub fn step(&mut self, phase_dot: f64, phase_dot_ref: f64, r: f64) -> AutomState {
        if self.override_active {
            self.state = AutomState::Manual;
            return self.state;
        }
        let rate = if phase_dot_ref > MIN_REFERENCE_RATE {
            phase_dot / phase_dot_ref
        } else {
            phase_dot
        };
        let rate = if rate.is_finite() { rate } else { 0.0 };
        let confident = r.is_finite() && r >= self.config.r_th;

        self.state = match self.state {
            AutomState::Manual if rate > self.config.phase_dot_preauto_th => AutomState::PreAuto,
            AutomState::Manual => AutomState::Manual,
            AutomState::PreAuto | AutomState::Auto if rate < self.config.phase_dot_preauto_th => {
                AutomState::Manual
            }
            AutomState::PreAuto if rate > self.config.phase_dot_th && confident => AutomState::Auto,
            held => held,
        };
        self.state
    }

    /// `true` while in AUTO.
    pub fn on_guide(&self) -> bool {
        self.state == AutomState::Auto
    }

    pub fn state(&self) -> AutomState {
        self.state
    }

    pub fn config(&self) -> &AutomatonConfig {
        &self.config
    }

    /// Assert or release the external override.  Asserting it forces MANUAL
    /// immediately.
    pub fn set_override(&mut self, active: bool) {
        self.override_active = active;
        if active {
            self.state = AutomState::Manual;
        }
    }

    pub fn override_active(&self) -> bool {
        self.override_active
    }

    /// Return to MANUAL without touching the override.
    pub fn reset(&mut self) {
        self.state = AutomState::Manual;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn autom() -> VirtualMechanismAutom {
        VirtualMechanismAutom::new(AutomatonConfig {
            phase_dot_preauto_th: 0.1,
            phase_dot_th: 0.3,
            r_th: 0.5,
        })
        .unwrap()
    }

    /// Drive the automaton up to AUTO with a unit reference rate.
    fn activated() -> VirtualMechanismAutom {
        let mut a = autom();
        a.step(0.2, 1.0, 1.0);
        a.step(0.5, 1.0, 1.0);
        assert!(a.on_guide());
        a
    }

    #[test]
    fn starts_manual() {
        let a = autom();
        assert_eq!(a.state(), AutomState::Manual);
        assert!(!a.on_guide());
    }

    #[test]
    fn climbs_one_state_per_step() {
        let mut a = autom();
        // Even a fast phase rate only reaches PREAUTO on the first step.
        assert_eq!(a.step(0.9, 1.0, 1.0), AutomState::PreAuto);
        assert_eq!(a.step(0.9, 1.0, 1.0), AutomState::Auto);
    }

    #[test]
    fn preauto_requires_confidence_for_auto() {
        let mut a = autom();
        a.step(0.5, 1.0, 0.1);
        assert_eq!(a.step(0.5, 1.0, 0.1), AutomState::PreAuto);
        assert_eq!(a.step(0.5, 1.0, 0.6), AutomState::Auto);
    }

    #[test]
    fn auto_falls_to_manual_below_lower_threshold_in_one_step() {
        let mut a = activated();
        assert_eq!(a.step(0.05, 1.0, 1.0), AutomState::Manual);
    }

    #[test]
    fn preauto_falls_to_manual_below_lower_threshold() {
        let mut a = autom();
        a.step(0.2, 1.0, 1.0);
        assert_eq!(a.step(0.0, 1.0, 1.0), AutomState::Manual);
    }

    #[test]
    fn auto_holds_between_thresholds() {
        let mut a = activated();
        for _ in 0..10 {
            assert_eq!(a.step(0.2, 1.0, 0.0), AutomState::Auto);
        }
    }

    #[test]
    fn oscillation_between_thresholds_changes_state_once() {
        let mut a = autom();
        let mut changes = 0;
        let mut last = a.state();
        for i in 0..50 {
            let rate = if i % 2 == 0 { 0.15 } else { 0.25 };
            let s = a.step(rate, 1.0, 1.0);
            if s != last {
                changes += 1;
                last = s;
            }
        }
        // Only the initial MANUAL -> PREAUTO crossing.
        assert_eq!(changes, 1);
        assert_eq!(a.state(), AutomState::PreAuto);
    }

    #[test]
    fn thresholds_scale_with_reference_rate() {
        let mut a = autom();
        // 0.15 is above the raw threshold but only 0.075 of a 2.0 reference.
        assert_eq!(a.step(0.15, 2.0, 1.0), AutomState::Manual);
        assert_eq!(a.step(0.25, 2.0, 1.0), AutomState::PreAuto);
    }

    #[test]
    fn raw_rate_used_without_reference() {
        let mut a = autom();
        assert_eq!(a.step(0.15, 0.0, 1.0), AutomState::PreAuto);
    }

    #[test]
    fn non_finite_rate_counts_as_stopped() {
        let mut a = activated();
        assert_eq!(a.step(f64::NAN, 1.0, 1.0), AutomState::Manual);
    }

    #[test]
    fn override_forces_manual_and_blocks_activation() {
        let mut a = activated();
        a.set_override(true);
        assert_eq!(a.state(), AutomState::Manual);
        a.step(0.5, 1.0, 1.0);
        assert_eq!(a.step(0.5, 1.0, 1.0), AutomState::Manual);
        a.set_override(false);
        a.step(0.5, 1.0, 1.0);
        assert_eq!(a.step(0.5, 1.0, 1.0), AutomState::Auto);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let err = VirtualMechanismAutom::new(AutomatonConfig {
            phase_dot_preauto_th: 0.5,
            phase_dot_th: 0.5,
            r_th: 0.5,
        })
        .unwrap_err();
        assert!(matches!(err, MechanismError::InvalidAutomaton(_)));
    }

    #[test]
    fn out_of_range_responsibility_threshold_rejected() {
        let cfg = AutomatonConfig {
            r_th: 1.5,
            ..AutomatonConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = AutomatonConfig {
            phase_dot_preauto_th: f64::NAN,
            ..AutomatonConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reset_returns_to_manual() {
        let mut a = activated();
        a.reset();
        assert_eq!(a.state(), AutomState::Manual);
        assert!(!a.override_active());
    }
}

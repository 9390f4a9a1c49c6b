//! [`FadeFilter`] – first-order activation ramp.
//!
//! Each mechanism slot owns one filter.  While the mechanism is on guide the
//! filter rises toward 1, otherwise it decays toward 0; the blended force of
//! a mechanism is always multiplied by the filter value, so activation
//! changes never produce a step in the commanded force larger than one
//! cycle's filter step.
//!
//! The filter snaps to its target once within [`SNAP_EPSILON`] so that a
//! decaying mechanism eventually stops contributing and can be retired.

/// Distance to the target under which the filter settles exactly on it.
pub const SNAP_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeFilter {
    gain: f64,
    value: f64,
}

impl FadeFilter {
    /// A filter at 0 with rate `gain` (1/s).  Non-finite or negative gains
    /// are treated as 0, which freezes the filter.
    pub fn new(gain: f64) -> Self {
        let gain = if gain.is_finite() { gain.max(0.0) } else { 0.0 };
        Self { gain, value: 0.0 }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Fraction of the remaining distance covered in one step of `dt`.
    pub fn max_step(&self, dt: f64) -> f64 {
        (self.gain * dt).clamp(0.0, 1.0)
    }

    /// Advance one cycle toward 1 when `on`, toward 0 otherwise.
    pub fn step(&mut self, on: bool, dt: f64) -> f64 {
        let target = if on { 1.0 } else { 0.0 };
        self.value += (target - self.value) * self.max_step(dt);
        if (target - self.value).abs() < SNAP_EPSILON {
            self.value = target;
        }
        self.value
    }

    /// Drop straight to 0.
    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rises_monotonically_toward_one() {
        let mut f = FadeFilter::new(10.0);
        let mut last = 0.0;
        for _ in 0..100 {
            let v = f.step(true, 0.01);
            assert!(v >= last && v <= 1.0);
            last = v;
        }
        assert!(last > 0.99);
    }

    #[test]
    fn single_step_bounded_by_gain() {
        let mut f = FadeFilter::new(10.0);
        let v = f.step(true, 0.001);
        assert!((v - 0.01).abs() < 1e-12);
        assert!(v <= f.max_step(0.001) + 1e-12);
    }

    #[test]
    fn decays_to_exactly_zero() {
        let mut f = FadeFilter::new(50.0);
        for _ in 0..100 {
            f.step(true, 0.01);
        }
        let mut cycles = 0;
        while f.value() > 0.0 {
            f.step(false, 0.01);
            cycles += 1;
            assert!(cycles < 1_000, "fade never settled");
        }
        assert_eq!(f.value(), 0.0);
    }

    #[test]
    fn large_dt_saturates_instead_of_overshooting() {
        let mut f = FadeFilter::new(10.0);
        assert_eq!(f.step(true, 5.0), 1.0);
        assert_eq!(f.step(false, 5.0), 0.0);
    }

    #[test]
    fn invalid_gain_freezes() {
        let mut f = FadeFilter::new(f64::NAN);
        assert_eq!(f.gain(), 0.0);
        assert_eq!(f.step(true, 0.1), 0.0);
    }
}

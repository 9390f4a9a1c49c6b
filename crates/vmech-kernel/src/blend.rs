//! Force blending.
//!
//! Reduces the per-mechanism guide forces `f_i`, their scales `g_i` and
//! fade values `a_i` to one commanded force.  A mechanism is a *candidate*
//! while `a_i > 0`, which covers both AUTO mechanisms and mechanisms still
//! fading out after leaving AUTO.  A candidate is *active* while its fade
//! is heading up (on guide, or ungated).
//!
//! | mode        | output                                                     |
//! |-------------|------------------------------------------------------------|
//! | `Hard`      | `a_k · f_k` for `k = argmax g_i` over active candidates    |
//! | `Soft`      | `max a_i · Σ a_i·g_i·f_i / Σ a_i·g_i`                      |
//! | `Potential` | `Σ a_i·g_i·f_i`                                            |
//!
//! SOFT is the fade-weighted average of the candidate forces, scaled by the
//! largest fade among weighted candidates.  A lone mechanism ramps in as
//! `a·f`, and a newcomer identical to a settled mechanism leaves the output
//! unchanged while it fades in.  A mechanism fading out never wins HARD, so
//! the output hands over to the remaining active mechanism at once.
//!
//! With no candidates, or when every weight is zero, the output is zero.
//! HARD ties go to the lowest index.  Everything runs in one pass over the
//! contributions and writes into a caller buffer.

use vmech_types::BlendMode;

/// One mechanism's input to [`blend`].
#[derive(Debug, Clone, Copy)]
pub struct Contribution<'a> {
    pub force: &'a [f64],
    pub scale: f64,
    pub fade: f64,
    /// Whether the mechanism may take over HARD this cycle.
    pub active: bool,
}

/// What [`blend`] did, for logging and reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlendSummary {
    /// Contributions with a positive fade.
    pub candidates: usize,
    /// HARD winner, by position in the input sequence.
    pub winner: Option<usize>,
}

/// Blend `contributions` into `out`.
///
/// `out` is overwritten.  Forces shorter than `out` contribute only their
/// leading components.
pub fn blend<'a, I>(mode: BlendMode, contributions: I, out: &mut [f64]) -> BlendSummary
where
    I: IntoIterator<Item = Contribution<'a>>,
{
    out.fill(0.0);
    let mut summary = BlendSummary::default();
    let mut weight_sum = 0.0;
    let mut peak_fade: f64 = 0.0;
    let mut best: Option<(f64, Contribution<'a>)> = None;

    for (index, c) in contributions.into_iter().enumerate() {
        if c.fade.is_nan() || c.fade <= 0.0 {
            continue;
        }
        summary.candidates += 1;
        let scale = if c.scale.is_finite() { c.scale.max(0.0) } else { 0.0 };
        match mode {
            BlendMode::Hard => {
                if c.active && scale > 0.0 && best.as_ref().is_none_or(|(s, _)| scale > *s) {
                    best = Some((scale, c));
                    summary.winner = Some(index);
                }
            }
            BlendMode::Soft | BlendMode::Potential => {
                let w = c.fade * scale;
                for (o, f) in out.iter_mut().zip(c.force) {
                    *o += w * f;
                }
                if w > 0.0 {
                    weight_sum += w;
                    peak_fade = peak_fade.max(c.fade);
                }
            }
        }
    }

    match mode {
        BlendMode::Hard => {
            if let Some((_, c)) = best {
                for (o, f) in out.iter_mut().zip(c.force) {
                    *o = c.fade * f;
                }
            }
        }
        BlendMode::Soft => {
            if weight_sum > 0.0 {
                let k = peak_fade / weight_sum;
                out.iter_mut().for_each(|o| *o *= k);
            } else {
                out.fill(0.0);
            }
        }
        BlendMode::Potential => {}
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn c(force: &[f64], scale: f64, fade: f64) -> Contribution<'_> {
        Contribution { force, scale, fade, active: true }
    }

    fn leaving(force: &[f64], scale: f64, fade: f64) -> Contribution<'_> {
        Contribution { force, scale, fade, active: false }
    }

    #[test]
    fn empty_input_gives_zero() {
        for mode in [BlendMode::Hard, BlendMode::Soft, BlendMode::Potential] {
            let mut out = [7.0, 7.0];
            let s = blend(mode, std::iter::empty(), &mut out);
            assert_eq!(out, [0.0, 0.0]);
            assert_eq!(s.candidates, 0);
        }
    }

    #[test]
    fn faded_out_mechanisms_are_ignored() {
        let f = [1.0, 1.0];
        let mut out = [0.0; 2];
        let s = blend(BlendMode::Soft, [c(&f, 1.0, 0.0)], &mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(s.candidates, 0);
    }

    #[test]
    fn hard_picks_highest_scale() {
        let f0 = [1.0, 0.0];
        let f1 = [0.0, 2.0];
        let mut out = [0.0; 2];
        let s = blend(BlendMode::Hard, [c(&f0, 0.3, 1.0), c(&f1, 0.8, 0.5)], &mut out);
        assert_eq!(s.winner, Some(1));
        assert_eq!(out, [0.0, 1.0]);
    }

    #[test]
    fn hard_tie_goes_to_lowest_index() {
        let f0 = [1.0];
        let f1 = [2.0];
        let mut out = [0.0];
        let s = blend(BlendMode::Hard, [c(&f0, 0.5, 1.0), c(&f1, 0.5, 1.0)], &mut out);
        assert_eq!(s.winner, Some(0));
        assert_eq!(out, [1.0]);
    }

    #[test]
    fn hard_ignores_mechanism_fading_out() {
        let staying = [10.0, 0.0];
        let leaving_force = [0.0, 1.0];
        let mut out = [0.0; 2];
        let s = blend(
            BlendMode::Hard,
            [c(&staying, 0.6, 1.0), leaving(&leaving_force, 0.99, 0.8)],
            &mut out,
        );
        assert_eq!(s.winner, Some(0));
        assert_eq!(s.candidates, 2);
        assert_eq!(out, [10.0, 0.0]);
    }

    #[test]
    fn hard_with_only_leaving_mechanisms_is_zero() {
        let f = [1.0];
        let mut out = [0.0];
        let s = blend(BlendMode::Hard, [leaving(&f, 0.9, 0.5)], &mut out);
        assert_eq!(s.winner, None);
        assert_eq!(out, [0.0]);
    }

    #[test]
    fn soft_with_zero_scales_is_zero() {
        let f = [3.0];
        let mut out = [0.0];
        blend(BlendMode::Soft, [c(&f, 0.0, 1.0), c(&f, 0.0, 1.0)], &mut out);
        assert_eq!(out, [0.0]);
    }

    #[test]
    fn soft_two_identical_mechanisms_equal_one() {
        let f = [0.4, -1.2];
        let mut one = [0.0; 2];
        let mut two = [0.0; 2];
        blend(BlendMode::Soft, [c(&f, 0.7, 1.0)], &mut one);
        blend(BlendMode::Soft, [c(&f, 0.7, 1.0), c(&f, 0.7, 1.0)], &mut two);
        for (a, b) in one.iter().zip(&two) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn soft_single_mechanism_ramps_with_its_fade() {
        let f = [5.0, -2.0];
        let mut out = [0.0; 2];
        blend(BlendMode::Soft, [c(&f, 0.9, 0.1)], &mut out);
        assert!((out[0] - 0.5).abs() < 1e-12);
        assert!((out[1] + 0.2).abs() < 1e-12);
    }

    #[test]
    fn soft_newcomer_identical_to_settled_mechanism_changes_nothing() {
        let f = [5.0, -2.0];
        for fade in [0.01, 0.1, 0.5, 0.99] {
            let mut out = [0.0; 2];
            blend(BlendMode::Soft, [c(&f, 0.9, 1.0), c(&f, 0.9, fade)], &mut out);
            assert!((out[0] - 5.0).abs() < 1e-12);
            assert!((out[1] + 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn soft_weights_by_fade() {
        let f0 = [1.0];
        let f1 = [3.0];
        let mut out = [0.0];
        blend(BlendMode::Soft, [c(&f0, 0.5, 1.0), c(&f1, 0.5, 0.25)], &mut out);
        assert!((out[0] - (1.0 + 0.25 * 3.0) / 1.25).abs() < 1e-12);
    }

    #[test]
    fn potential_sums_scaled_forces() {
        let f0 = [1.0];
        let f1 = [2.0];
        let mut out = [0.0];
        blend(BlendMode::Potential, [c(&f0, 0.5, 1.0), c(&f1, 0.25, 0.5)], &mut out);
        assert!((out[0] - (0.5 + 0.25)).abs() < 1e-12);
    }

    #[test]
    fn non_finite_scale_is_treated_as_zero() {
        let f = [1.0];
        let mut out = [0.0];
        let s = blend(BlendMode::Hard, [c(&f, f64::NAN, 1.0)], &mut out);
        assert_eq!(s.winner, None);
        assert_eq!(out, [0.0]);
    }

    fn contribution_set() -> impl Strategy<Value = Vec<(Vec<f64>, f64, f64, bool)>> {
        prop::collection::vec(
            (
                prop::collection::vec(-100.0f64..100.0, 3),
                0.0f64..=1.0,
                0.0f64..=1.0,
                any::<bool>(),
            ),
            0..6,
        )
    }

    proptest! {
        #[test]
        fn soft_output_bounded_by_candidate_forces(set in contribution_set()) {
            let mut out = [0.0; 3];
            blend(
                BlendMode::Soft,
                set.iter().map(|(f, g, a, on)| Contribution { force: f, scale: *g, fade: *a, active: *on }),
                &mut out,
            );
            for axis in 0..3 {
                let bound = set
                    .iter()
                    .filter(|(_, _, a, _)| *a > 0.0)
                    .map(|(f, _, _, _)| f[axis].abs())
                    .fold(0.0, f64::max);
                prop_assert!(out[axis].abs() <= bound + 1e-9);
            }
        }

        #[test]
        fn hard_output_is_one_faded_force(set in contribution_set()) {
            let mut out = [0.0; 3];
            let s = blend(
                BlendMode::Hard,
                set.iter().map(|(f, g, a, on)| Contribution { force: f, scale: *g, fade: *a, active: *on }),
                &mut out,
            );
            match s.winner {
                Some(k) => {
                    let (f, g, a, on) = &set[k];
                    prop_assert!(*on);
                    for axis in 0..3 {
                        prop_assert!((out[axis] - a * f[axis]).abs() < 1e-12);
                    }
                    for (_, g2, a2, on2) in &set {
                        if *a2 > 0.0 && *on2 {
                            prop_assert!(g2 <= g);
                        }
                    }
                }
                None => prop_assert_eq!(out, [0.0; 3]),
            }
        }

        #[test]
        fn potential_is_linear_in_contributions(set in contribution_set()) {
            let mut whole = [0.0; 3];
            blend(
                BlendMode::Potential,
                set.iter().map(|(f, g, a, on)| Contribution { force: f, scale: *g, fade: *a, active: *on }),
                &mut whole,
            );
            let mut summed = [0.0; 3];
            for (f, g, a, on) in &set {
                let mut single = [0.0; 3];
                let one = Contribution { force: f, scale: *g, fade: *a, active: *on };
                blend(BlendMode::Potential, [one], &mut single);
                for axis in 0..3 {
                    summed[axis] += single[axis];
                }
            }
            for axis in 0..3 {
                prop_assert!((whole[axis] - summed[axis]).abs() < 1e-9);
            }
        }
    }
}

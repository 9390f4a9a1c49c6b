//! Arc-length parametrised path model.
//!
//! A [`Trajectory`] stores a demonstration resampled to a fixed number of
//! points spaced uniformly in normalized arc length `p ∈ [0, 1]`, plus a
//! per-axis spread used to turn distances into confidences.
//!
//! Resampling by arc length doubles as phase alignment: two demonstrations
//! of the same motion executed at different speeds land on the same sample
//! grid, so merging them is a point-wise running average.

use serde::{Deserialize, Serialize};
use vmech_types::ModelError;

use crate::demonstration::Demonstration;

/// Paths shorter than this are rejected as degenerate.
const MIN_PATH_LENGTH: f64 = 1e-9;

/// Fitted path model shared by every guide mechanism variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    points: Vec<Vec<f64>>,
    spread: Vec<f64>,
    /// Per-axis sum of squared deviations from the running mean, pooled over
    /// every sample point.
    sq_dev: Vec<f64>,
    length: f64,
    demonstrations: u32,
    initial_spread: f64,
}

impl Trajectory {
    /// Fit a trajectory from a single demonstration.
    ///
    /// `n_points` must be at least 2 and `initial_spread` strictly positive;
    /// the spread stays at `initial_spread` until a second demonstration has
    /// been merged.
    pub fn fit(demo: &Demonstration, n_points: usize, initial_spread: f64) -> Result<Self, ModelError> {
        if n_points < 2 {
            return Err(ModelError::InvalidParameter(format!(
                "resample_points must be >= 2, got {n_points}"
            )));
        }
        if !(initial_spread.is_finite() && initial_spread > 0.0) {
            return Err(ModelError::InvalidParameter(format!(
                "initial_spread must be positive, got {initial_spread}"
            )));
        }
        let points = resample(demo.rows(), n_points)?;
        let length = polyline_length(&points);
        Ok(Self {
            spread: vec![initial_spread; demo.dim()],
            sq_dev: vec![0.0; demo.dim()],
            points,
            length,
            demonstrations: 1,
            initial_spread,
        })
    }

    pub fn dim(&self) -> usize {
        self.spread.len()
    }

    /// Number of resampled points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Arc length of the mean path.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn spread(&self) -> &[f64] {
        &self.spread
    }

    pub fn points(&self) -> &[Vec<f64>] {
        &self.points
    }

    /// Number of demonstrations folded into the model.
    pub fn demonstrations(&self) -> u32 {
        self.demonstrations
    }

    /// Structural check for trajectories restored from disk.
    pub(crate) fn check(&self) -> Result<(), ModelError> {
        let dim = self.dim();
        let consistent = dim > 0
            && self.points.len() >= 2
            && self.sq_dev.len() == dim
            && self.points.iter().all(|p| p.len() == dim)
            && self.spread.iter().all(|s| s.is_finite() && *s > 0.0)
            && self.demonstrations >= 1;
        if consistent {
            Ok(())
        } else {
            Err(ModelError::Parse("inconsistent trajectory".to_string()))
        }
    }

    /// Write the position at normalized phase `p` into `position` and the
    /// derivative with respect to `p` into `tangent`.
    ///
    /// `p` is clamped to `[0, 1]`.  Both output slices must have length
    /// [`Trajectory::dim`].  Does not allocate.
    pub fn sample(&self, p: f64, position: &mut [f64], tangent: &mut [f64]) {
        let n = self.points.len();
        let u = p.clamp(0.0, 1.0) * (n - 1) as f64;
        let k = (u.floor() as usize).min(n - 2);
        let t = u - k as f64;
        let (a, b) = (&self.points[k], &self.points[k + 1]);
        for d in 0..position.len().min(a.len()) {
            let delta = b[d] - a[d];
            position[d] = a[d] + t * delta;
            tangent[d] = delta * (n - 1) as f64;
        }
    }

    /// Spread-weighted Euclidean distance between `position` and `reference`.
    pub fn weighted_distance(&self, position: &[f64], reference: &[f64]) -> f64 {
        self.weighted_sq(position, reference).sqrt()
    }

    fn weighted_sq(&self, position: &[f64], reference: &[f64]) -> f64 {
        position
            .iter()
            .zip(reference)
            .zip(&self.spread)
            .map(|((x, r), s)| {
                let z = (x - r) / s;
                z * z
            })
            .sum()
    }

    /// Align `demo` onto the sample grid and fold it into the running mean
    /// and spread.
    ///
    /// The model is left unchanged when the demonstration is rejected.
    pub fn align_and_merge(&mut self, demo: &Demonstration) -> Result<(), ModelError> {
        if demo.dim() != self.dim() {
            return Err(ModelError::DimensionMismatch {
                expected: self.dim(),
                actual: demo.dim(),
            });
        }
        let aligned = resample(demo.rows(), self.points.len())?;
        let count = f64::from(self.demonstrations) + 1.0;
        for (mean, sample) in self.points.iter_mut().zip(&aligned) {
            for d in 0..sample.len() {
                let delta = sample[d] - mean[d];
                mean[d] += delta / count;
                self.sq_dev[d] += delta * (sample[d] - mean[d]);
            }
        }
        self.demonstrations += 1;

        let dof = f64::from(self.demonstrations - 1) * self.points.len() as f64;
        for (spread, sq) in self.spread.iter_mut().zip(&self.sq_dev) {
            *spread = (sq / dof).sqrt().max(self.initial_spread);
        }
        self.length = polyline_length(&self.points);
        Ok(())
    }

    /// Mean point-wise likelihood, in `[0, 1]`, that `demo` follows this
    /// path once both are aligned by arc length.
    ///
    /// Demonstrations of the wrong dimension or with a degenerate path get
    /// zero responsibility.
    pub fn responsibility(&self, demo: &Demonstration) -> f64 {
        if demo.dim() != self.dim() {
            return 0.0;
        }
        let Ok(aligned) = resample(demo.rows(), self.points.len()) else {
            return 0.0;
        };
        let total: f64 = aligned
            .iter()
            .zip(&self.points)
            .map(|(sample, mean)| (-0.5 * self.weighted_sq(sample, mean)).exp())
            .sum();
        total / self.points.len() as f64
    }
}

/// Resample a polyline to `n` points spaced uniformly in arc length.
fn resample(rows: &[Vec<f64>], n: usize) -> Result<Vec<Vec<f64>>, ModelError> {
    let mut cumulative = Vec::with_capacity(rows.len());
    cumulative.push(0.0);
    for pair in rows.windows(2) {
        let last = cumulative[cumulative.len() - 1];
        cumulative.push(last + euclidean(&pair[0], &pair[1]));
    }
    let total = cumulative[cumulative.len() - 1];
    if total < MIN_PATH_LENGTH {
        return Err(ModelError::DegeneratePath);
    }

    let mut out = Vec::with_capacity(n);
    let mut seg = 0;
    for j in 0..n {
        let target = total * j as f64 / (n - 1) as f64;
        while seg + 2 < rows.len() && cumulative[seg + 1] < target {
            seg += 1;
        }
        let span = cumulative[seg + 1] - cumulative[seg];
        let t = if span > 0.0 {
            ((target - cumulative[seg]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (a, b) = (&rows[seg], &rows[seg + 1]);
        out.push(a.iter().zip(b).map(|(x, y)| x + t * (y - x)).collect());
    }
    Ok(out)
}

fn polyline_length(points: &[Vec<f64>]) -> f64 {
    points.windows(2).map(|w| euclidean(&w[0], &w[1])).sum()
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(from: [f64; 2], to: [f64; 2], samples: usize) -> Demonstration {
        let rows = (0..samples)
            .map(|i| {
                let t = i as f64 / (samples - 1) as f64;
                vec![from[0] + t * (to[0] - from[0]), from[1] + t * (to[1] - from[1])]
            })
            .collect();
        Demonstration::from_rows(rows).unwrap()
    }

    #[test]
    fn resampling_is_uniform_in_arc_length() {
        // Uneven input spacing along the x axis.
        let demo = Demonstration::from_rows(vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.2, 0.0],
            vec![1.0, 0.0],
        ])
        .unwrap();
        let traj = Trajectory::fit(&demo, 5, 0.1).unwrap();
        let xs: Vec<f64> = traj.points().iter().map(|p| p[0]).collect();
        for (x, expected) in xs.iter().zip([0.0, 0.25, 0.5, 0.75, 1.0]) {
            assert!((x - expected).abs() < 1e-12, "{xs:?}");
        }
        assert!((traj.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_sample_is_degenerate() {
        let demo = Demonstration::from_rows(vec![vec![1.0, 1.0]]).unwrap();
        assert_eq!(Trajectory::fit(&demo, 10, 0.1), Err(ModelError::DegeneratePath));
    }

    #[test]
    fn stationary_samples_are_degenerate() {
        let demo = Demonstration::from_rows(vec![vec![1.0, 1.0]; 20]).unwrap();
        assert_eq!(Trajectory::fit(&demo, 10, 0.1), Err(ModelError::DegeneratePath));
    }

    #[test]
    fn invalid_parameters_rejected() {
        let demo = line([0.0, 0.0], [1.0, 0.0], 10);
        assert!(matches!(
            Trajectory::fit(&demo, 1, 0.1),
            Err(ModelError::InvalidParameter(_))
        ));
        assert!(matches!(
            Trajectory::fit(&demo, 10, 0.0),
            Err(ModelError::InvalidParameter(_))
        ));
    }

    #[test]
    fn sample_interpolates_position_and_tangent() {
        let traj = Trajectory::fit(&line([0.0, 0.0], [2.0, 0.0], 11), 21, 0.1).unwrap();
        let mut pos = [0.0; 2];
        let mut tan = [0.0; 2];
        traj.sample(0.5, &mut pos, &mut tan);
        assert!((pos[0] - 1.0).abs() < 1e-12);
        // d(position)/dp equals the path length for a straight line.
        assert!((tan[0] - 2.0).abs() < 1e-9);
        assert!(tan[1].abs() < 1e-12);

        traj.sample(1.5, &mut pos, &mut tan);
        assert!((pos[0] - 2.0).abs() < 1e-12);
        traj.sample(-1.0, &mut pos, &mut tan);
        assert!(pos[0].abs() < 1e-12);
    }

    #[test]
    fn merging_an_offset_demonstration_moves_mean_halfway() {
        let mut traj = Trajectory::fit(&line([0.0, 0.0], [1.0, 0.0], 10), 11, 0.01).unwrap();
        traj.align_and_merge(&line([0.0, 0.2], [1.0, 0.2], 30)).unwrap();
        assert_eq!(traj.demonstrations(), 2);
        for p in traj.points() {
            assert!((p[1] - 0.1).abs() < 1e-12);
        }
        // Both demonstrations deviate by 0.1 from the mean along y.
        assert!(traj.spread()[1] > 0.1);
        assert!((traj.spread()[0] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn merging_identical_demonstration_keeps_initial_spread() {
        let demo = line([0.0, 0.0], [1.0, 1.0], 10);
        let mut traj = Trajectory::fit(&demo, 11, 0.05).unwrap();
        let before = traj.points().to_vec();
        traj.align_and_merge(&demo).unwrap();
        assert_eq!(traj.spread(), &[0.05, 0.05]);
        for (a, b) in traj.points().iter().zip(&before) {
            assert!((a[0] - b[0]).abs() < 1e-12);
        }
    }

    #[test]
    fn merge_rejects_wrong_dimension_without_mutation() {
        let mut traj = Trajectory::fit(&line([0.0, 0.0], [1.0, 0.0], 10), 11, 0.05).unwrap();
        let before = traj.clone();
        let demo3 = Demonstration::from_rows(vec![vec![0.0; 3], vec![1.0; 3]]).unwrap();
        assert!(matches!(
            traj.align_and_merge(&demo3),
            Err(ModelError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert_eq!(traj, before);
    }

    #[test]
    fn responsibility_is_high_for_own_path_and_low_elsewhere() {
        let demo = line([0.0, 0.0], [1.0, 0.0], 10);
        let traj = Trajectory::fit(&demo, 11, 0.05).unwrap();
        assert!((traj.responsibility(&demo) - 1.0).abs() < 1e-9);
        let far = line([0.0, 1.0], [1.0, 1.0], 10);
        assert!(traj.responsibility(&far) < 1e-6);
        let degenerate = Demonstration::from_rows(vec![vec![0.0, 0.0]]).unwrap();
        assert_eq!(traj.responsibility(&degenerate), 0.0);
    }
}

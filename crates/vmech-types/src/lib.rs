//! `vmech-types` – shared vocabulary of the virtual-mechanism stack.
//!
//! Everything that crosses a crate boundary lives here: the blending policy
//! selector, stiffness/damping gains, the stable mechanism handle, the
//! serializable status snapshot and the two error enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Policy used to fuse the per-mechanism forces into one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Winner-take-all: the on-guide mechanism with the greatest scale.
    Hard,
    /// Scale-weighted average of the on-guide mechanisms.
    #[default]
    Soft,
    /// Unnormalized scale-weighted superposition.
    Potential,
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlendMode::Hard => write!(f, "hard"),
            BlendMode::Soft => write!(f, "soft"),
            BlendMode::Potential => write!(f, "potential"),
        }
    }
}

impl FromStr for BlendMode {
    type Err = MechanismError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hard" => Ok(BlendMode::Hard),
            "soft" => Ok(BlendMode::Soft),
            "potential" => Ok(BlendMode::Potential),
            other => Err(MechanismError::InvalidConfig(format!(
                "unknown blend mode '{other}' (expected hard, soft or potential)"
            ))),
        }
    }
}

/// Stiffness or damping acting on a `D`-dimensional error vector.
///
/// A scalar is broadcast over every axis, a diagonal scales each axis
/// independently and a full matrix is stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Gain {
    Scalar(f64),
    Diagonal(Vec<f64>),
    Full(Vec<Vec<f64>>),
}

impl Gain {
    /// Check that this gain can act on a vector of length `dim`.
    pub fn check_dim(&self, dim: usize) -> Result<(), MechanismError> {
        match self {
            Gain::Scalar(_) => Ok(()),
            Gain::Diagonal(d) if d.len() == dim => Ok(()),
            Gain::Diagonal(d) => Err(MechanismError::DimensionMismatch {
                expected: dim,
                actual: d.len(),
            }),
            Gain::Full(rows) => {
                if rows.len() != dim {
                    return Err(MechanismError::DimensionMismatch {
                        expected: dim,
                        actual: rows.len(),
                    });
                }
                match rows.iter().find(|r| r.len() != dim) {
                    Some(bad) => Err(MechanismError::DimensionMismatch {
                        expected: dim,
                        actual: bad.len(),
                    }),
                    None => Ok(()),
                }
            }
        }
    }

    /// Accumulate `G·v` into `out`.
    ///
    /// `v` and `out` must have the length the gain was validated for; extra
    /// trailing entries are ignored.
    pub fn apply_add(&self, v: &[f64], out: &mut [f64]) {
        match self {
            Gain::Scalar(k) => {
                for (o, x) in out.iter_mut().zip(v) {
                    *o += k * x;
                }
            }
            Gain::Diagonal(d) => {
                for ((o, x), k) in out.iter_mut().zip(v).zip(d) {
                    *o += k * x;
                }
            }
            Gain::Full(rows) => {
                for (o, row) in out.iter_mut().zip(rows) {
                    *o += row.iter().zip(v).map(|(k, x)| k * x).sum::<f64>();
                }
            }
        }
    }
}

impl Default for Gain {
    fn default() -> Self {
        Gain::Scalar(0.0)
    }
}

/// Stable identity of a live mechanism slot.
///
/// The generation is bumped every time a slot is recycled, so a handle that
/// outlives its mechanism never resolves to a different one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MechanismHandle {
    pub slot: u32,
    pub generation: u32,
}

impl fmt::Display for MechanismHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// Read-only snapshot of one mechanism, for operator tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismStatus {
    pub index: usize,
    pub handle: MechanismHandle,
    pub name: String,
    pub source: Option<String>,
    pub phase: f64,
    pub phase_dot: f64,
    pub scale: f64,
    pub responsibility: f64,
    pub fade: f64,
    pub on_guide: bool,
    /// `true` while a deletion is fading the mechanism out.
    pub retiring: bool,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
}

/// Failures while building, loading, or saving a single mechanism model.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelError {
    #[error("demonstration contains no samples")]
    EmptyDemonstration,

    #[error("demonstration row {row} has {actual} values, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("demonstration row {row} contains a non-finite value")]
    NonFinite { row: usize },

    #[error("demonstration path has zero length")]
    DegeneratePath,

    #[error("model dimension {actual} does not match {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("I/O error on {path}: {details}")]
    Io { path: String, details: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("unsupported model file format {0}")]
    UnsupportedFormat(u32),

    #[error("invalid model parameter: {0}")]
    InvalidParameter(String),
}

/// Error type of the mechanism manager and its lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MechanismError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("mechanism index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("mechanism handle {0} no longer refers to a live mechanism")]
    StaleHandle(MechanismHandle),

    #[error("no mechanism named '{0}'")]
    UnknownMechanism(String),

    #[error("invalid time step {0}")]
    InvalidTimeStep(f64),

    #[error("invalid automaton thresholds: {0}")]
    InvalidAutomaton(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("lifecycle operation was cancelled")]
    Cancelled,

    #[error("lifecycle worker has stopped")]
    WorkerStopped,

    #[error("failed to start lifecycle worker: {0}")]
    WorkerStart(String),
}

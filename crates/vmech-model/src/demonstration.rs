//! Demonstration data: a validated `N×D` matrix of recorded poses.
//!
//! Demonstrations come from an operator guiding the robot by hand (recorded
//! by the caller) or from JSON files holding an array of rows:
//!
//! ```json
//! [[0.0, 0.0], [0.1, 0.02], [0.2, 0.05]]
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use vmech_types::ModelError;

/// A validated sequence of `D`-dimensional poses.
///
/// Construction guarantees at least one row, identical row lengths, a
/// non-zero dimension and finite values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct Demonstration {
    dim: usize,
    rows: Vec<Vec<f64>>,
}

impl Demonstration {
    /// Validate and wrap `rows`.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ModelError> {
        let dim = match rows.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => return Err(ModelError::EmptyDemonstration),
        };
        for (row, values) in rows.iter().enumerate() {
            if values.len() != dim {
                return Err(ModelError::RaggedRow {
                    row,
                    expected: dim,
                    actual: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ModelError::NonFinite { row });
            }
        }
        Ok(Self { dim, rows })
    }

    /// Load a demonstration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = fs::read_to_string(path).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ModelError::Parse(e.to_string()))
    }

    /// Write the demonstration to `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let raw = serde_json::to_string(&self.rows).map_err(|e| ModelError::Parse(e.to_string()))?;
        fs::write(path, raw).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            details: e.to_string(),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }
}

impl TryFrom<Vec<Vec<f64>>> for Demonstration {
    type Error = ModelError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<Demonstration> for Vec<Vec<f64>> {
    fn from(demo: Demonstration) -> Self {
        demo.rows
    }
}

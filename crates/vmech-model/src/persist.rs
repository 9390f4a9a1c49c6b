//! JSON model files.
//!
//! A model file carries a format version, the mechanism variant, its name,
//! its tuning parameters and the fitted trajectory:
//!
//! ```json
//! { "format": 1, "kind": { "guide": "normalized" }, "name": "reach",
//!   "params": { ... }, "trajectory": { ... } }
//! ```
//!
//! Files are read and written by lifecycle workers only; nothing here is
//! real-time safe.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vmech_types::ModelError;

use crate::MechanismKind;
use crate::guide::{GuideMechanism, GuideParams};
use crate::mechanism::VirtualMechanism;
use crate::trajectory::Trajectory;

/// Current model file format.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct MechanismFile {
    format: u32,
    kind: MechanismKind,
    name: String,
    params: GuideParams,
    trajectory: Trajectory,
}

pub(crate) fn save_guide(guide: &GuideMechanism, path: &Path) -> Result<(), ModelError> {
    let file = MechanismFile {
        format: FORMAT_VERSION,
        kind: MechanismKind::Guide(guide.mode()),
        name: guide.name().to_string(),
        params: guide.params().clone(),
        trajectory: guide.trajectory().clone(),
    };
    let raw = serde_json::to_string_pretty(&file).map_err(|e| ModelError::Parse(e.to_string()))?;
    fs::write(path, raw).map_err(|e| io_error(path, e))?;
    debug!(path = %path.display(), name = %file.name, "model saved");
    Ok(())
}

/// Save any mechanism through its own persistence hook.
pub fn save_mechanism(mechanism: &dyn VirtualMechanism, path: &Path) -> Result<(), ModelError> {
    mechanism.save_to_file(path)
}

/// Load a mechanism previously written by [`save_mechanism`].
///
/// # Errors
///
/// [`ModelError::Io`] when the file cannot be read, [`ModelError::Parse`]
/// when it is not a model file, [`ModelError::UnsupportedFormat`] for a
/// newer format version, and [`ModelError::InvalidParameter`] when the
/// stored parameters do not fit the stored trajectory.
pub fn load_mechanism(path: &Path) -> Result<Box<dyn VirtualMechanism>, ModelError> {
    let raw = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let file: MechanismFile =
        serde_json::from_str(&raw).map_err(|e| ModelError::Parse(e.to_string()))?;
    if file.format != FORMAT_VERSION {
        return Err(ModelError::UnsupportedFormat(file.format));
    }
    file.trajectory.check()?;
    file.params.validate(file.trajectory.dim())?;
    debug!(path = %path.display(), name = %file.name, "model loaded");
    match file.kind {
        MechanismKind::Guide(mode) => Ok(Box::new(GuideMechanism::from_parts(
            file.name,
            mode,
            file.params,
            file.trajectory,
        ))),
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ModelError {
    ModelError::Io {
        path: path.display().to_string(),
        details: e.to_string(),
    }
}

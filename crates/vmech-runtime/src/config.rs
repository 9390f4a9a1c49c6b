//! Configuration Vault – reads/writes `~/.vmech/config.toml`.
//!
//! Only the fields present in the file override the defaults.  `VMECH_*`
//! environment variables are applied on top of the file; see
//! [`apply_env_overrides`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vmech_kernel::AutomatonConfig;
use vmech_model::{GuideParams, MechanismKind};
use vmech_types::{BlendMode, MechanismError};

/// Manager configuration persisted in `~/.vmech/config.toml`.
///
/// Scalar fields come first so the TOML serializer can emit the nested
/// tables after them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Position-space dimensionality `D` shared by every mechanism.
    pub position_dim: usize,

    /// Blending mode used when the caller does not pick one.
    pub blend_mode: BlendMode,

    /// Sharpness `c` of the scale `exp(-½·c·d²)`.
    pub convergence_factor: f64,

    /// Rate (1/s) of the per-mechanism fade filter.
    pub fade_gain: f64,

    /// When `false`, every mechanism contributes regardless of its
    /// automaton state.
    pub gate_on_automaton: bool,

    /// Minimum responsibility for a clustered demonstration to be merged into
    /// an existing mechanism instead of creating a new one.
    pub cluster_threshold: f64,

    /// Upper bound on how long a deletion waits for the fade-out.
    pub retire_timeout_ms: u64,

    /// Background threads running lifecycle operations.  With one thread,
    /// operations complete in submission order.
    pub lifecycle_threads: usize,

    /// Activation thresholds applied to every new mechanism.
    pub automaton: AutomatonConfig,

    /// Variant fitted by data insertion and clustering.
    pub mechanism_kind: MechanismKind,

    /// Tuning of mechanisms fitted from data.
    pub mechanism: GuideParams,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            position_dim: 3,
            blend_mode: BlendMode::Soft,
            convergence_factor: 1.0,
            fade_gain: 10.0,
            gate_on_automaton: true,
            cluster_threshold: 0.5,
            retire_timeout_ms: 2_000,
            lifecycle_threads: 1,
            automaton: AutomatonConfig::default(),
            mechanism_kind: MechanismKind::default(),
            mechanism: GuideParams::default(),
        }
    }
}

impl ManagerConfig {
    /// Default configuration for a `position_dim`-dimensional manager.
    pub fn with_dim(position_dim: usize) -> Self {
        Self {
            position_dim,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// [`MechanismError::InvalidConfig`] naming the first offending field, or
    /// [`MechanismError::InvalidAutomaton`] for bad activation thresholds.
    pub fn validate(&self) -> Result<(), MechanismError> {
        if self.position_dim == 0 {
            return Err(MechanismError::InvalidConfig("position_dim must be at least 1".into()));
        }
        if !(self.convergence_factor.is_finite() && self.convergence_factor >= 0.0) {
            return Err(MechanismError::InvalidConfig(format!(
                "convergence_factor must be finite and non-negative, got {}",
                self.convergence_factor
            )));
        }
        if !(self.fade_gain.is_finite() && self.fade_gain > 0.0) {
            return Err(MechanismError::InvalidConfig(format!(
                "fade_gain must be positive, got {}",
                self.fade_gain
            )));
        }
        if !(0.0..=1.0).contains(&self.cluster_threshold) {
            return Err(MechanismError::InvalidConfig(format!(
                "cluster_threshold {} outside [0, 1]",
                self.cluster_threshold
            )));
        }
        if self.lifecycle_threads == 0 {
            return Err(MechanismError::InvalidConfig("lifecycle_threads must be at least 1".into()));
        }
        self.automaton.validate()?;
        self.mechanism
            .validate(self.position_dim)
            .map_err(|e| MechanismError::InvalidConfig(format!("mechanism: {e}")))
    }
}

/// Return the path to `~/.vmech/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".vmech").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<ManagerConfig>, MechanismError> {
    load_from(&config_path())
}

/// Load, apply environment overrides and validate the config at `path`.
pub fn load_from(path: &Path) -> Result<Option<ManagerConfig>, MechanismError> {
    let Some(mut cfg) = read_from(path)? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(Some(cfg))
}

/// Parse the file alone, without overrides or validation.
pub(crate) fn read_from(path: &Path) -> Result<Option<ManagerConfig>, MechanismError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        MechanismError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
    })?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| MechanismError::InvalidConfig(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `VMECH_*` environment variable overrides to `cfg`.
///
/// Unparsable values are ignored with a warning.
///
/// | Variable | Config field |
/// |---|---|
/// | `VMECH_POSITION_DIM` | `position_dim` |
/// | `VMECH_BLEND_MODE` | `blend_mode` |
/// | `VMECH_CONVERGENCE_FACTOR` | `convergence_factor` |
/// | `VMECH_FADE_GAIN` | `fade_gain` |
/// | `VMECH_RETIRE_TIMEOUT_MS` | `retire_timeout_ms` |
pub fn apply_env_overrides(cfg: &mut ManagerConfig) {
    override_from_env("VMECH_POSITION_DIM", &mut cfg.position_dim);
    override_from_env("VMECH_BLEND_MODE", &mut cfg.blend_mode);
    override_from_env("VMECH_CONVERGENCE_FACTOR", &mut cfg.convergence_factor);
    override_from_env("VMECH_FADE_GAIN", &mut cfg.fade_gain);
    override_from_env("VMECH_RETIRE_TIMEOUT_MS", &mut cfg.retire_timeout_ms);
}

fn override_from_env<T: std::str::FromStr>(var: &str, field: &mut T) {
    if let Ok(v) = std::env::var(var) {
        match v.parse::<T>() {
            Ok(parsed) => *field = parsed,
            Err(_) => warn!(var, value = %v, "ignoring unparsable environment override"),
        }
    }
}

/// Save the config to `~/.vmech/config.toml`.
pub fn save(cfg: &ManagerConfig) -> Result<(), MechanismError> {
    save_to(cfg, &config_path())
}

/// Save the config to `path`, creating parent directories as needed.
pub fn save_to(cfg: &ManagerConfig, path: &Path) -> Result<(), MechanismError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            MechanismError::InvalidConfig(format!("failed to create {}: {e}", parent.display()))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| MechanismError::InvalidConfig(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        MechanismError::InvalidConfig(format!("failed to write {}: {e}", path.display()))
    })?;
    debug!(path = %path.display(), "configuration saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmech_model::PhaseMode;
    use vmech_types::Gain;

    #[test]
    fn default_config_is_valid() {
        ManagerConfig::default().validate().expect("valid");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = ManagerConfig::default();
        save_to(&cfg, &path).expect("save");

        let loaded = read_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.mechanism_kind, MechanismKind::Guide(PhaseMode::Normalized));
        assert_eq!(loaded.mechanism.stiffness, Gain::Scalar(300.0));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "position_dim = 2\nblend_mode = \"hard\"\n\n[mechanism]\nstiffness = [100.0, 50.0]\n",
        )
        .unwrap();
        let cfg = read_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.position_dim, 2);
        assert_eq!(cfg.blend_mode, BlendMode::Hard);
        assert_eq!(cfg.mechanism.stiffness, Gain::Diagonal(vec![100.0, 50.0]));
        assert_eq!(cfg.mechanism.damping, Gain::Scalar(30.0));
        assert_eq!(cfg.fade_gain, 10.0);
    }

    #[test]
    fn invalid_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[automaton]\nphase_dot_preauto_th = 0.5\nphase_dot_th = 0.2\n").unwrap();
        assert!(matches!(load_from(&path), Err(MechanismError::InvalidAutomaton(_))));
    }

    #[test]
    fn gain_shape_must_match_dimension() {
        let mut cfg = ManagerConfig::with_dim(3);
        cfg.mechanism.damping = Gain::Diagonal(vec![1.0, 2.0]);
        assert!(matches!(cfg.validate(), Err(MechanismError::InvalidConfig(_))));
    }

    #[test]
    fn config_path_points_to_vmech_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".vmech"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_blend_mode() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("VMECH_BLEND_MODE", "potential") };
        let mut cfg = ManagerConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.blend_mode, BlendMode::Potential);
        unsafe { std::env::remove_var("VMECH_BLEND_MODE") };
    }

    #[test]
    fn apply_env_overrides_changes_fade_gain() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("VMECH_FADE_GAIN", "25.5") };
        let mut cfg = ManagerConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.fade_gain, 25.5);
        unsafe { std::env::remove_var("VMECH_FADE_GAIN") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_value() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("VMECH_RETIRE_TIMEOUT_MS", "soon") };
        let mut cfg = ManagerConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.retire_timeout_ms, 2_000);
        unsafe { std::env::remove_var("VMECH_RETIRE_TIMEOUT_MS") };
    }
}

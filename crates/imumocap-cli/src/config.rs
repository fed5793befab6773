//! Configuration – reads/writes `~/.imumocap/config.toml`.
//!
//! ```toml
//! model = "lower_body"
//!
//! [stream]
//! fps = 30
//! timing = "compensated"
//! forward_axis = "z"
//! calibration_countdown = 3
//! countdown_interval_ms = 500
//! calibrate_on_first_frame = false
//! ignored_links = ["left_toe", "right_toe"]
//! log_every_frames = 300
//! ```

use imumocap_runtime::{StreamConfig, TimingMode};
use imumocap_types::{Axis, MocapError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::Model;

/// Persisted user configuration stored in `~/.imumocap/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Skeleton used by `stream` and `animate`.
    #[serde(default)]
    pub model: Model,

    #[serde(default)]
    pub stream: StreamConfig,
}

impl Config {
    /// Defaults with the model's sensorless links ignored.
    pub fn for_model(model: Model) -> Self {
        Self {
            model,
            stream: StreamConfig {
                ignored_links: model.unsensored_links().iter().map(|s| s.to_string()).collect(),
                ..StreamConfig::default()
            },
        }
    }
}

/// Return the path to `~/.imumocap/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".imumocap").join("config.toml")
}

/// Load the file at `path` (defaults when absent), apply `IMUMOCAP_*`
/// overrides and validate the result.
pub fn resolve(path: &Path) -> Result<Config, MocapError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.stream.validate()?;
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, MocapError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        MocapError::InvalidConfig(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| MocapError::InvalidConfig(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Apply `IMUMOCAP_*` environment variable overrides to `cfg`.
///
/// Values that fail to parse are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `IMUMOCAP_MODEL` | `model` |
/// | `IMUMOCAP_FPS` | `stream.fps` |
/// | `IMUMOCAP_TIMING` | `stream.timing` |
/// | `IMUMOCAP_FORWARD_AXIS` | `stream.forward_axis` |
/// | `IMUMOCAP_CALIBRATE_ON_FIRST_FRAME` | `stream.calibrate_on_first_frame` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("IMUMOCAP_MODEL")
        && let Ok(model) = v.parse::<Model>()
    {
        cfg.model = model;
    }
    if let Ok(v) = std::env::var("IMUMOCAP_FPS")
        && let Ok(fps) = v.trim().parse::<u32>()
    {
        cfg.stream.fps = fps;
    }
    if let Ok(v) = std::env::var("IMUMOCAP_TIMING")
        && let Ok(timing) = v.parse::<TimingMode>()
    {
        cfg.stream.timing = timing;
    }
    if let Ok(v) = std::env::var("IMUMOCAP_FORWARD_AXIS")
        && let Ok(axis) = v.parse::<Axis>()
    {
        cfg.stream.forward_axis = axis;
    }
    if let Ok(v) = std::env::var("IMUMOCAP_CALIBRATE_ON_FIRST_FRAME")
        && let Ok(flag) = v.trim().parse::<bool>()
    {
        cfg.stream.calibrate_on_first_frame = flag;
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), MocapError> {
    let io_err = |what: &str, e: std::io::Error| MocapError::InvalidConfig(format!("{what}: {e}"));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create config directory", e))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to set config directory permissions", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| MocapError::InvalidConfig(format!("failed to serialize config: {e}")))?;
    // Owner read/write only (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| io_err(&format!("failed to write config at {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| io_err(&format!("failed to write config at {}", path.display()), e))?;
    Ok(())
}

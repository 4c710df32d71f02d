//! Configuration loading and config file resolution

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, FadeCurve, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AMBIMIX_CONFIG";

/// Mixer tuning parameters
///
/// Every field has a compiled default, so a config file only needs the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Crossfade duration used when an atmosphere has none
    pub default_crossfade_ms: u64,
    /// Curve used when an atmosphere has none
    pub default_curve: FadeCurve,
    /// Default duration of a single channel `fade_to`
    pub channel_fade_ms: u64,
    /// Extra wait after a ramp's scheduled end before it is finalized
    pub fade_settle_margin_ms: u64,
    /// Period of the orchestrator progress tick
    pub progress_interval_ms: u64,
    /// Progress fraction at which `almost_complete` fires
    pub almost_complete_threshold: f32,
    /// Volume differences at or below this are not reported as changes
    pub volume_epsilon: f32,
    /// Event bus buffer size
    pub event_capacity: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            default_crossfade_ms: crate::models::DEFAULT_CROSSFADE_MS,
            default_curve: FadeCurve::Linear,
            channel_fade_ms: 2000,
            fade_settle_margin_ms: 20,
            progress_interval_ms: 50,
            almost_complete_threshold: 0.95,
            volume_epsilon: 0.01,
            event_capacity: 1000,
        }
    }
}

impl MixerConfig {
    /// Parse a TOML document, clamping out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MixerConfig = toml::from_str(text)?;
        Ok(config.sanitized())
    }

    /// Load a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load configuration following the resolution order:
    /// 1. Command-line argument (highest priority)
    /// 2. `AMBIMIX_CONFIG` environment variable
    /// 3. Platform config file (`<config dir>/ambimix/config.toml`)
    /// 4. Compiled defaults (fallback)
    ///
    /// An explicitly named file that cannot be read is an error; a missing
    /// platform file falls back to defaults.
    pub fn load(cli_arg: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_arg {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Self::from_file(Path::new(&path));
            }
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                debug!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Clamp values into their valid ranges
    pub fn sanitized(mut self) -> Self {
        self.almost_complete_threshold = if self.almost_complete_threshold.is_nan() {
            0.95
        } else {
            self.almost_complete_threshold.clamp(0.0, 1.0)
        };
        self.progress_interval_ms = self.progress_interval_ms.max(1);
        self.volume_epsilon = self.volume_epsilon.max(0.0);
        self.event_capacity = self.event_capacity.max(1);
        self
    }

    pub fn default_crossfade(&self) -> Duration {
        Duration::from_millis(self.default_crossfade_ms)
    }

    pub fn channel_fade(&self) -> Duration {
        Duration::from_millis(self.channel_fade_ms)
    }

    pub fn fade_settle_margin(&self) -> Duration {
        Duration::from_millis(self.fade_settle_margin_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Get the platform config file path
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ambimix").join("config.toml"))
}

//! Configuration System using Figment
//!
//! Strongly-typed configuration for a mirror session. Values are layered:
//! 1. Built-in defaults (the MIRAO install layout)
//! 2. TOML file (`config/mirao.toml` by default)
//! 3. Environment variables (prefixed with `MIRAO_`, `__` separates tables)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! MIRAO_DEVICE__PORT=COM4
//! MIRAO_DEVICE__DISPATCH_MODE=immediate
//! MIRAO_PATHS__CALIBRATION=/opt/mirao/init/MIRAO_calibration.aomi
//! MIRAO_DRIVER__SETTLE_TIME=25ms
//! MIRAO_LOGGING__LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mirao_dm::config::DmConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = DmConfig::load()?;
//!     println!("Calibration: {}", config.paths.calibration.display());
//!     println!("Dispatch mode: {:?}", config.device.dispatch_mode);
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ArtifactPaths;
use crate::session::{CommitPolicy, DispatchMode};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/mirao.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::LoadError(Box::new(err))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DmConfig {
    /// Device connection and dispatch behaviour
    #[serde(default)]
    pub device: DeviceConfig,
    /// Calibration and wavefront file locations
    #[serde(default)]
    pub paths: PathsConfig,
    /// Driver settings
    #[serde(default)]
    pub driver: DriverConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port identifier used by the host framework; immutable once
    /// the mirror is initialized
    #[serde(default = "default_port")]
    pub port: String,
    /// Deferred (store-then-apply) or immediate (apply-on-set)
    #[serde(default)]
    pub dispatch_mode: DispatchMode,
    /// What happens to pending deltas when a dispatch fails
    #[serde(default)]
    pub commit_policy: CommitPolicy,
}

/// File locations. The first four are required for initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_mirror_init")]
    pub mirror_init: PathBuf,
    #[serde(default = "default_calibration")]
    pub calibration: PathBuf,
    #[serde(default = "default_calibration_params")]
    pub calibration_params: PathBuf,
    #[serde(default = "default_diversity_prefs")]
    pub diversity_prefs: PathBuf,
    /// Absolute wavefront applied right after initialization, if it exists
    #[serde(default = "default_startup_wavefront", skip_serializing_if = "Option::is_none")]
    pub startup_wavefront: Option<PathBuf>,
    /// Default target of "save current position"
    #[serde(default = "default_save_path")]
    pub save_path: PathBuf,
}

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Settle time of the simulated mirror after each shape change
    #[serde(default = "default_settle_time", with = "humantime_serde")]
    pub settle_time: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_port() -> String {
    "Undefined".to_string()
}

fn default_mirror_init() -> PathBuf {
    PathBuf::from("MIRAO/init/MIRAO_initialization.dat")
}

fn default_calibration() -> PathBuf {
    PathBuf::from("MIRAO/init/MIRAO_calibration.aomi")
}

fn default_calibration_params() -> PathBuf {
    PathBuf::from("MIRAO/init/Diversity_calibration.xml")
}

fn default_diversity_prefs() -> PathBuf {
    PathBuf::from("MIRAO/init/Diversity_prefs.xml")
}

fn default_startup_wavefront() -> Option<PathBuf> {
    Some(PathBuf::from("MIRAO/init/WavefrontCorrection.wcs"))
}

fn default_save_path() -> PathBuf {
    PathBuf::from("MIRAO/WavefrontCorrection_save.wcs")
}

fn default_settle_time() -> Duration {
    Duration::from_millis(10)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            dispatch_mode: DispatchMode::default(),
            commit_policy: CommitPolicy::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            mirror_init: default_mirror_init(),
            calibration: default_calibration(),
            calibration_params: default_calibration_params(),
            diversity_prefs: default_diversity_prefs(),
            startup_wavefront: default_startup_wavefront(),
            save_path: default_save_path(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            settle_time: default_settle_time(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl DmConfig {
    /// Load configuration from `config/mirao.toml` and the environment.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Precedence (highest to lowest): `MIRAO_` environment variables, the
    /// TOML file, built-in defaults. The result is validated.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(DmConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MIRAO_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Port and required paths are not empty
    /// - Settle time is at most one second
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.device.port.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "'device.port' cannot be empty".to_string(),
            ));
        }

        let required = [
            ("paths.mirror_init", &self.paths.mirror_init),
            ("paths.calibration", &self.paths.calibration),
            ("paths.calibration_params", &self.paths.calibration_params),
            ("paths.diversity_prefs", &self.paths.diversity_prefs),
            ("paths.save_path", &self.paths.save_path),
        ];
        for (key, path) in required {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(format!("'{key}' cannot be empty")));
            }
        }

        if self.driver.settle_time > Duration::from_secs(1) {
            return Err(ConfigError::ValidationError(format!(
                "'driver.settle_time' of {:?} exceeds 1s",
                self.driver.settle_time
            )));
        }

        Ok(())
    }

    /// The four initialization paths.
    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            mirror_init: self.paths.mirror_init.clone(),
            calibration: self.paths.calibration.clone(),
            calibration_params: self.paths.calibration_params.clone(),
            diversity_prefs: self.paths.diversity_prefs.clone(),
        }
    }

    /// Render as TOML, e.g. to seed a configuration file.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

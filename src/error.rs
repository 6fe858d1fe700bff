//! Custom error types for the mirror controller.
//!
//! This module defines the primary error type, `DmError`, for the whole crate.
//! Using the `thiserror` crate, it gives every layer (calibration context,
//! wavefront session, host property adapter, session actor) one consistent
//! way to report failures as values.
//!
//! ## Error Hierarchy
//!
//! - **`MissingFile`**: A precondition failure. A file that a load or swap
//!   needs does not exist. Fully recoverable; nothing was mutated.
//! - **`DriverFailure`**: The mirror driver (vendor SDK) rejected a call. The
//!   session stays `Ready`; the caller decides whether to retry.
//! - **`NotReady`**: A stateful operation was invoked before initialization
//!   succeeded, or after shutdown.
//! - **`PortChangeForbidden`** / **`SettingLocked`**: An attempt to change a
//!   connection setting that is immutable once the device is initialized.
//! - **`UnknownProperty`** / **`InvalidPropertyValue`**: Raised by the host
//!   property adapter when a caller names a property that does not exist or
//!   passes a value that does not parse.
//! - **`Config`**: Wraps configuration loading and validation errors.
//! - **`ActorUnavailable`**: The session actor has stopped and can no longer
//!   accept requests.
//!
//! No variant is process-fatal: shutdown is always possible.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::driver::{DriverError, DriverOperation};

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DmError>;

/// Which on-disk artifact a path refers to.
///
/// The declaration order of the first four variants is the order in which
/// initialization checks for their existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Mirror hardware initialization file.
    MirrorInit,
    /// Calibration model (influence functions of the actuators).
    Calibration,
    /// Diversity engine calibration parameters.
    CalibrationParams,
    /// Diversity engine preferences.
    DiversityPrefs,
    /// Absolute wavefront (actuator command) file.
    Wavefront,
}

impl ArtifactKind {
    /// Stable lowercase identifier used in logs and configuration keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::MirrorInit => "mirror_init",
            ArtifactKind::Calibration => "calibration",
            ArtifactKind::CalibrationParams => "calibration_params",
            ArtifactKind::DiversityPrefs => "diversity_prefs",
            ArtifactKind::Wavefront => "wavefront",
        }
    }

    /// Human readable description, matching the device's error texts.
    pub fn description(&self) -> &'static str {
        match self {
            ArtifactKind::MirrorInit => "Mirror initialization file",
            ArtifactKind::Calibration => "Diversity initialization file",
            ArtifactKind::CalibrationParams => "Calibration parameter file",
            ArtifactKind::DiversityPrefs => "Diversity preferences file",
            ArtifactKind::Wavefront => "Wavefront file",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DmError {
    #[error("{} does not exist. Looking for: {}", kind.description(), path.display())]
    MissingFile { kind: ArtifactKind, path: PathBuf },

    #[error("Driver failure during {operation}: {source}")]
    DriverFailure {
        operation: DriverOperation,
        #[source]
        source: DriverError,
    },

    #[error("Mirror is not initialized")]
    NotReady,

    #[error("Port cannot be changed after initialization")]
    PortChangeForbidden,

    #[error("Setting '{0}' cannot be changed after initialization")]
    SettingLocked(&'static str),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Invalid value '{value}' for property '{property}'")]
    InvalidPropertyValue { property: String, value: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session actor is no longer running")]
    ActorUnavailable,
}

impl DmError {
    /// Wrap a driver error with the operation that produced it.
    pub fn driver(operation: DriverOperation, source: DriverError) -> Self {
        DmError::DriverFailure { operation, source }
    }

    /// Legacy numeric code reported to the host framework.
    ///
    /// Driver, readiness and adapter errors have no dedicated code and map to
    /// the generic error code `1`.
    pub fn code(&self) -> i32 {
        match self {
            DmError::PortChangeForbidden => 10001,
            DmError::MissingFile { kind, .. } => match kind {
                ArtifactKind::MirrorInit => 10201,
                ArtifactKind::Calibration => 10202,
                ArtifactKind::CalibrationParams => 10203,
                ArtifactKind::DiversityPrefs => 10204,
                ArtifactKind::Wavefront => 10205,
            },
            _ => 1,
        }
    }
}

//! Mirror driver interface
//!
//! Hardware-agnostic seam between the wavefront core and the vendor SDK that
//! actually talks to the mirror. The SDK exposes four kinds of resources:
//!
//! - a mirror **handle** (the physical connection),
//! - a **calibration model** loaded against that handle, which also carries
//!   the stateful diversity engine,
//! - diversity **calibration parameters**,
//! - diversity **preferences**.
//!
//! [`MirrorDriver`] models them as associated types so that the calibration
//! context can own them without knowing their representation.
//!
//! ## Settle time
//!
//! `apply_relative` and `apply_absolute_from_file` must not return before the
//! mirror has physically settled. Callers never wait on their own.
//!
//! ## Available implementations
//!
//! - [`simulated::SimulatedMirror`] - in-process 52-actuator mirror for tests
//!   and dry runs

pub mod simulated;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::zernike::CoefficientBuffer;

/// Number of actuators on the MIRAO 52-e.
pub const ACTUATOR_COUNT: usize = 52;

/// Result type for driver calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Errors reported by a mirror driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed file {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Diversity engine is not initialized")]
    EngineNotInitialized,

    #[error("Command rejected by driver: {0}")]
    Rejected(String),
}

/// Driver entry points, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverOperation {
    Open,
    LoadCalibration,
    LoadCalibParams,
    LoadDivPrefs,
    InitDiversityEngine,
    ApplyRelative,
    ApplyAbsolute,
    SavePositions,
}

impl DriverOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverOperation::Open => "open",
            DriverOperation::LoadCalibration => "load_calibration",
            DriverOperation::LoadCalibParams => "load_calib_params",
            DriverOperation::LoadDivPrefs => "load_div_prefs",
            DriverOperation::InitDiversityEngine => "init_diversity_engine",
            DriverOperation::ApplyRelative => "apply_relative",
            DriverOperation::ApplyAbsolute => "apply_absolute",
            DriverOperation::SavePositions => "save_positions",
        }
    }
}

impl fmt::Display for DriverOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor mirror driver.
///
/// Calls are synchronous and may block on hardware I/O. Implementations are
/// owned by exactly one calibration context and never shared.
pub trait MirrorDriver: Send {
    /// Open connection to the mirror hardware.
    type Handle: Send;
    /// Calibration model; owns the diversity engine state.
    type CalibModel: Send;
    /// Diversity calibration parameters.
    type CalibParams: Send;
    /// Diversity preferences.
    type DivPrefs: Send;

    /// Open the mirror described by the initialization file at `path` and
    /// bring up its hardware.
    fn open(&mut self, path: &Path) -> DriverResult<Self::Handle>;

    /// Load a calibration model bound to `handle`.
    fn load_calibration(
        &mut self,
        path: &Path,
        handle: &Self::Handle,
    ) -> DriverResult<Self::CalibModel>;

    fn load_calib_params(&mut self, path: &Path) -> DriverResult<Self::CalibParams>;

    fn load_div_prefs(&mut self, path: &Path) -> DriverResult<Self::DivPrefs>;

    /// (Re-)initialize the diversity engine held by `model` from the triple.
    ///
    /// The engine embeds the parameters and preferences it was initialized
    /// with; it must be re-initialized whenever any of the three changes.
    fn init_diversity_engine(
        &mut self,
        model: &mut Self::CalibModel,
        params: &Self::CalibParams,
        prefs: &Self::DivPrefs,
    ) -> DriverResult<()>;

    /// Add the Zernike `delta` to the mirror's current shape.
    fn apply_relative(
        &mut self,
        handle: &mut Self::Handle,
        model: &Self::CalibModel,
        delta: &CoefficientBuffer,
    ) -> DriverResult<()>;

    /// Replace the mirror's shape with the actuator commands stored at `path`.
    fn apply_absolute_from_file(
        &mut self,
        handle: &mut Self::Handle,
        model: &Self::CalibModel,
        path: &Path,
    ) -> DriverResult<()>;

    /// Write the current actuator positions to `path`, creating or
    /// overwriting it.
    fn save_current_positions(
        &mut self,
        handle: &Self::Handle,
        model: &Self::CalibModel,
        path: &Path,
    ) -> DriverResult<()>;

    /// Release the hardware connection.
    fn close(&mut self, handle: Self::Handle) {
        drop(handle);
    }
}

/// Existence check run before every load or swap.
pub trait FileProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

/// [`FileProbe`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl FileProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_probe_sees_regular_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("MIRAO_calibration.aomi");
        std::fs::write(&file, "calibration").unwrap();

        assert!(FsProbe.exists(&file));
        assert!(!FsProbe.exists(dir.path()));
        assert!(!FsProbe.exists(&dir.path().join("missing.xml")));
    }

    #[test]
    fn operation_names_are_snake_case() {
        assert_eq!(DriverOperation::InitDiversityEngine.to_string(), "init_diversity_engine");
        assert_eq!(DriverOperation::ApplyRelative.to_string(), "apply_relative");
    }
}

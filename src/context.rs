//! Calibration context: mirror handle plus calibration triple.
//!
//! [`CalibrationContext`] is the only owner of the driver and of every
//! resource the driver hands out. It either holds a fully consistent set
//! (handle, calibration model, calibration parameters, diversity preferences,
//! initialized diversity engine) or nothing at all.
//!
//! # State machine
//!
//! ```text
//!                initialize()                 swap_*()
//! Uninitialized ─────────────▶ Ready ◀──────────────────┐
//!       ▲                        │  └───────────────────┘
//!       └──────── shutdown() ────┘
//! ```
//!
//! A failed transition leaves the context in its prior state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::driver::{DriverOperation, FileProbe, FsProbe, MirrorDriver};
use crate::error::{AppResult, ArtifactKind, DmError};
use crate::zernike::CoefficientBuffer;

/// Lifecycle state of a [`CalibrationContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Uninitialized,
    Ready,
}

/// Record of a successfully loaded artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// Increments on every successful load of this kind within a context.
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
}

impl CalibrationArtifact {
    fn new(kind: ArtifactKind, path: &Path, version: u64) -> Self {
        Self {
            kind,
            path: path.to_path_buf(),
            version,
            loaded_at: Utc::now(),
        }
    }

    fn next(&self, path: &Path) -> Self {
        Self::new(self.kind, path, self.version + 1)
    }
}

/// Paths of the four artifacts required to bring up the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub mirror_init: PathBuf,
    pub calibration: PathBuf,
    pub calibration_params: PathBuf,
    pub diversity_prefs: PathBuf,
}

impl ArtifactPaths {
    /// Paths in the order their existence is checked.
    pub fn in_check_order(&self) -> [(ArtifactKind, &Path); 4] {
        [
            (ArtifactKind::MirrorInit, self.mirror_init.as_path()),
            (ArtifactKind::Calibration, self.calibration.as_path()),
            (ArtifactKind::CalibrationParams, self.calibration_params.as_path()),
            (ArtifactKind::DiversityPrefs, self.diversity_prefs.as_path()),
        ]
    }
}

struct Loaded<T> {
    value: T,
    artifact: CalibrationArtifact,
}

struct Resources<D: MirrorDriver> {
    handle: D::Handle,
    mirror_init: PathBuf,
    calibration: Loaded<D::CalibModel>,
    params: Loaded<D::CalibParams>,
    prefs: Loaded<D::DivPrefs>,
    engine_generation: u64,
}

/// Owner of the driver and all calibration resources.
pub struct CalibrationContext<D: MirrorDriver> {
    driver: D,
    probe: Box<dyn FileProbe>,
    resources: Option<Resources<D>>,
}

impl<D: MirrorDriver> CalibrationContext<D> {
    /// Create an uninitialized context probing the local filesystem.
    pub fn new(driver: D) -> Self {
        Self::with_probe(driver, Box::new(FsProbe))
    }

    /// Create an uninitialized context with a custom existence probe.
    pub fn with_probe(driver: D, probe: Box<dyn FileProbe>) -> Self {
        Self {
            driver,
            probe,
            resources: None,
        }
    }

    pub fn state(&self) -> ContextState {
        if self.resources.is_some() {
            ContextState::Ready
        } else {
            ContextState::Uninitialized
        }
    }

    pub fn is_ready(&self) -> bool {
        self.resources.is_some()
    }

    /// The currently active artifact of `kind`, if the context is ready.
    ///
    /// `MirrorInit` and `Wavefront` are not tracked as artifacts.
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&CalibrationArtifact> {
        let res = self.resources.as_ref()?;
        match kind {
            ArtifactKind::Calibration => Some(&res.calibration.artifact),
            ArtifactKind::CalibrationParams => Some(&res.params.artifact),
            ArtifactKind::DiversityPrefs => Some(&res.prefs.artifact),
            ArtifactKind::MirrorInit | ArtifactKind::Wavefront => None,
        }
    }

    /// Mirror initialization file the handle was opened from.
    pub fn mirror_init_path(&self) -> Option<&Path> {
        self.resources.as_ref().map(|r| r.mirror_init.as_path())
    }

    /// Calibration triples accepted since `initialize`, starting at 1.
    ///
    /// Re-initializing the engine with the previous triple after a failed
    /// swap does not count.
    pub fn engine_generation(&self) -> Option<u64> {
        self.resources.as_ref().map(|r| r.engine_generation)
    }

    fn require_file(&self, kind: ArtifactKind, path: &Path) -> AppResult<()> {
        if self.probe.exists(path) {
            Ok(())
        } else {
            Err(DmError::MissingFile {
                kind,
                path: path.to_path_buf(),
            })
        }
    }

    fn ready(&mut self) -> AppResult<(&mut D, &mut Resources<D>)> {
        match self.resources.as_mut() {
            Some(res) => Ok((&mut self.driver, res)),
            None => Err(DmError::NotReady),
        }
    }

    /// Bring up the mirror and its calibration.
    ///
    /// All four files must exist; the first missing one in the order
    /// mirror-init, calibration, calibration-params, diversity-preferences is
    /// reported. Initializing a ready context is a no-op.
    ///
    /// # Errors
    /// - `MissingFile` if a file does not exist (nothing is opened)
    /// - `DriverFailure` if any loader fails (everything opened so far is
    ///   released)
    pub fn initialize(&mut self, paths: &ArtifactPaths) -> AppResult<()> {
        if self.is_ready() {
            debug!("Calibration context already initialized");
            return Ok(());
        }

        for (kind, path) in paths.in_check_order() {
            self.require_file(kind, path)?;
        }

        let driver = &mut self.driver;
        let handle = driver
            .open(&paths.mirror_init)
            .map_err(|e| DmError::driver(DriverOperation::Open, e))?;

        let loaded = Self::load_triple(driver, &handle, paths);
        let (mut model, params, prefs) = match loaded {
            Ok(triple) => triple,
            Err(err) => {
                driver.close(handle);
                return Err(err);
            }
        };

        if let Err(e) = driver.init_diversity_engine(&mut model, &params, &prefs) {
            driver.close(handle);
            return Err(DmError::driver(DriverOperation::InitDiversityEngine, e));
        }

        info!(
            mirror_init = %paths.mirror_init.display(),
            calibration = %paths.calibration.display(),
            "Calibration context ready"
        );

        self.resources = Some(Resources {
            handle,
            mirror_init: paths.mirror_init.clone(),
            calibration: Loaded {
                value: model,
                artifact: CalibrationArtifact::new(ArtifactKind::Calibration, &paths.calibration, 1),
            },
            params: Loaded {
                value: params,
                artifact: CalibrationArtifact::new(
                    ArtifactKind::CalibrationParams,
                    &paths.calibration_params,
                    1,
                ),
            },
            prefs: Loaded {
                value: prefs,
                artifact: CalibrationArtifact::new(
                    ArtifactKind::DiversityPrefs,
                    &paths.diversity_prefs,
                    1,
                ),
            },
            engine_generation: 1,
        });
        Ok(())
    }

    fn load_triple(
        driver: &mut D,
        handle: &D::Handle,
        paths: &ArtifactPaths,
    ) -> AppResult<(D::CalibModel, D::CalibParams, D::DivPrefs)> {
        let model = driver
            .load_calibration(&paths.calibration, handle)
            .map_err(|e| DmError::driver(DriverOperation::LoadCalibration, e))?;
        let params = driver
            .load_calib_params(&paths.calibration_params)
            .map_err(|e| DmError::driver(DriverOperation::LoadCalibParams, e))?;
        let prefs = driver
            .load_div_prefs(&paths.diversity_prefs)
            .map_err(|e| DmError::driver(DriverOperation::LoadDivPrefs, e))?;
        Ok((model, params, prefs))
    }

    /// Release the mirror handle and all calibration resources.
    pub fn shutdown(&mut self) {
        if let Some(res) = self.resources.take() {
            self.driver.close(res.handle);
            info!("Calibration context shut down");
        }
    }

    /// Replace the calibration model and re-initialize the diversity engine.
    ///
    /// The new model is loaded against the existing mirror handle.
    pub fn swap_calibration(&mut self, path: &Path) -> AppResult<()> {
        if !self.is_ready() {
            return Err(DmError::NotReady);
        }
        self.require_file(ArtifactKind::Calibration, path)?;
        let (driver, res) = self.ready()?;

        let mut model = driver
            .load_calibration(path, &res.handle)
            .map_err(|e| DmError::driver(DriverOperation::LoadCalibration, e))?;
        driver
            .init_diversity_engine(&mut model, &res.params.value, &res.prefs.value)
            .map_err(|e| DmError::driver(DriverOperation::InitDiversityEngine, e))?;

        // The previous model still holds its own engine, so dropping the new
        // one on failure above leaves the context untouched.
        res.calibration = Loaded {
            value: model,
            artifact: res.calibration.artifact.next(path),
        };
        res.engine_generation += 1;
        info!(path = %path.display(), "Calibration swapped");
        Ok(())
    }

    /// Replace the diversity calibration parameters and re-initialize the
    /// diversity engine.
    pub fn swap_calibration_params(&mut self, path: &Path) -> AppResult<()> {
        if !self.is_ready() {
            return Err(DmError::NotReady);
        }
        self.require_file(ArtifactKind::CalibrationParams, path)?;
        let (driver, res) = self.ready()?;

        let params = driver
            .load_calib_params(path)
            .map_err(|e| DmError::driver(DriverOperation::LoadCalibParams, e))?;

        if let Err(e) = driver.init_diversity_engine(&mut res.calibration.value, &params, &res.prefs.value) {
            Self::restore_engine(driver, res);
            return Err(DmError::driver(DriverOperation::InitDiversityEngine, e));
        }

        res.params = Loaded {
            value: params,
            artifact: res.params.artifact.next(path),
        };
        res.engine_generation += 1;
        info!(path = %path.display(), "Calibration parameters swapped");
        Ok(())
    }

    /// Replace the diversity preferences and re-initialize the diversity
    /// engine.
    pub fn swap_diversity_prefs(&mut self, path: &Path) -> AppResult<()> {
        if !self.is_ready() {
            return Err(DmError::NotReady);
        }
        self.require_file(ArtifactKind::DiversityPrefs, path)?;
        let (driver, res) = self.ready()?;

        let prefs = driver
            .load_div_prefs(path)
            .map_err(|e| DmError::driver(DriverOperation::LoadDivPrefs, e))?;

        if let Err(e) = driver.init_diversity_engine(&mut res.calibration.value, &res.params.value, &prefs) {
            Self::restore_engine(driver, res);
            return Err(DmError::driver(DriverOperation::InitDiversityEngine, e));
        }

        res.prefs = Loaded {
            value: prefs,
            artifact: res.prefs.artifact.next(path),
        };
        res.engine_generation += 1;
        info!(path = %path.display(), "Diversity preferences swapped");
        Ok(())
    }

    /// Re-run engine initialization with the triple still on record after a
    /// failed re-initialization left the engine in an unknown state.
    fn restore_engine(driver: &mut D, res: &mut Resources<D>) {
        match driver.init_diversity_engine(&mut res.calibration.value, &res.params.value, &res.prefs.value) {
            Ok(()) => debug!("Diversity engine restored to previous artifacts"),
            Err(e) => warn!(error = %e, "Diversity engine could not be restored"),
        }
    }

    /// Replace the mirror shape with the absolute commands stored at `path`.
    ///
    /// On success the caller must forget any tracked Zernike coefficients.
    pub fn load_absolute_wavefront(&mut self, path: &Path) -> AppResult<()> {
        if !self.is_ready() {
            return Err(DmError::NotReady);
        }
        self.require_file(ArtifactKind::Wavefront, path)?;
        let (driver, res) = self.ready()?;

        driver
            .apply_absolute_from_file(&mut res.handle, &res.calibration.value, path)
            .map_err(|e| DmError::driver(DriverOperation::ApplyAbsolute, e))?;
        info!(path = %path.display(), "Absolute wavefront applied");
        Ok(())
    }

    /// Persist the current actuator positions to `path` (create or overwrite).
    pub fn save_current_position(&mut self, path: &Path) -> AppResult<()> {
        let (driver, res) = self.ready()?;
        driver
            .save_current_positions(&res.handle, &res.calibration.value, path)
            .map_err(|e| DmError::driver(DriverOperation::SavePositions, e))?;
        info!(path = %path.display(), "Current position saved");
        Ok(())
    }

    /// Dispatch a relative Zernike command.
    pub fn apply_relative_delta(&mut self, delta: &CoefficientBuffer) -> AppResult<()> {
        let (driver, res) = self.ready()?;
        driver
            .apply_relative(&mut res.handle, &res.calibration.value, delta)
            .map_err(|e| DmError::driver(DriverOperation::ApplyRelative, e))
    }
}

impl<D: MirrorDriver> Drop for CalibrationContext<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Wavefront session: the caller-facing protocol.
//!
//! [`WavefrontSession`] ties a [`CommandTranslator`] to a
//! [`CalibrationContext`]. Callers set absolute Zernike targets per mode; the
//! session turns them into relative commands for the diversity engine and
//! keeps the applied/pending bookkeeping consistent with what the driver
//! actually accepted.
//!
//! Two dispatch modes are supported, selected by configuration:
//!
//! - [`DispatchMode::Deferred`]: `set_mode` only records a pending delta;
//!   `apply_pending` sends all of them as one relative command.
//! - [`DispatchMode::Immediate`]: `set_mode` sends the delta before returning.
//!
//! For the same sequence of `set_mode` calls both modes end with the same
//! applied coefficients.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::DmConfig;
use crate::context::{CalibrationArtifact, CalibrationContext, ContextState};
use crate::driver::{FileProbe, MirrorDriver};
use crate::error::{AppResult, ArtifactKind, DmError};
use crate::translator::CommandTranslator;
use crate::zernike::{CoefficientBuffer, Mode};

/// When a target set through `set_mode` reaches the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Store-then-apply: targets accumulate until `apply_pending`.
    #[default]
    Deferred,
    /// Apply-on-set: every `set_mode` dispatches right away.
    Immediate,
}

/// Fate of pending deltas when the driver rejects a relative command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Clear pending, leave applied unchanged.
    #[default]
    DiscardOnFailure,
    /// Keep pending so the next `apply_pending` retries it.
    RetainOnFailure,
}

/// Serializable view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: ContextState,
    pub port: String,
    pub dispatch_mode: DispatchMode,
    pub commit_policy: CommitPolicy,
    pub applied: CoefficientBuffer,
    pub pending: CoefficientBuffer,
    pub mirror_init: PathBuf,
    pub artifacts: Vec<CalibrationArtifact>,
    pub engine_generation: Option<u64>,
    pub last_wavefront: Option<PathBuf>,
    pub last_save: Option<PathBuf>,
}

/// Orchestrates translator and calibration context for one mirror.
pub struct WavefrontSession<D: MirrorDriver> {
    context: CalibrationContext<D>,
    translator: CommandTranslator,
    config: DmConfig,
    last_wavefront: Option<PathBuf>,
    last_save: Option<PathBuf>,
}

impl<D: MirrorDriver> WavefrontSession<D> {
    pub fn new(driver: D, config: DmConfig) -> Self {
        Self::from_context(CalibrationContext::new(driver), config)
    }

    pub fn with_probe(driver: D, probe: Box<dyn FileProbe>, config: DmConfig) -> Self {
        Self::from_context(CalibrationContext::with_probe(driver, probe), config)
    }

    fn from_context(context: CalibrationContext<D>, config: DmConfig) -> Self {
        Self {
            context,
            translator: CommandTranslator::new(),
            config,
            last_wavefront: None,
            last_save: None,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bring up the mirror with the configured artifact paths.
    ///
    /// If a startup wavefront is configured and present it is applied
    /// afterwards; failing to apply it only logs a warning. Initializing a
    /// ready session does nothing.
    #[instrument(skip(self), fields(port = %self.config.device.port))]
    pub fn initialize(&mut self) -> AppResult<()> {
        if self.context.is_ready() {
            debug!("Session already initialized");
            return Ok(());
        }

        self.context.initialize(&self.config.artifact_paths())?;
        self.translator.reset_all();
        info!(mode = ?self.config.device.dispatch_mode, "Wavefront session ready");

        if let Some(path) = self.config.paths.startup_wavefront.clone() {
            match self.load_absolute_wavefront(&path) {
                Ok(()) => {}
                Err(DmError::MissingFile { .. }) => {
                    debug!(path = %path.display(), "No startup wavefront found");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Startup wavefront not applied");
                }
            }
        }
        Ok(())
    }

    /// Release the mirror and forget all tracked coefficients.
    pub fn shutdown(&mut self) {
        self.context.shutdown();
        self.translator.reset_all();
    }

    pub fn state(&self) -> ContextState {
        self.context.state()
    }

    pub fn is_ready(&self) -> bool {
        self.context.is_ready()
    }

    fn require_ready(&self) -> AppResult<()> {
        if self.context.is_ready() {
            Ok(())
        } else {
            Err(DmError::NotReady)
        }
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn config(&self) -> &DmConfig {
        &self.config
    }

    pub fn port(&self) -> &str {
        &self.config.device.port
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.config.device.dispatch_mode
    }

    /// Change the port. Only possible before initialization.
    pub fn set_port(&mut self, port: impl Into<String>) -> AppResult<()> {
        if self.context.is_ready() {
            return Err(DmError::PortChangeForbidden);
        }
        self.config.device.port = port.into();
        Ok(())
    }

    /// Point an artifact kind at a new file.
    ///
    /// Before initialization this only overrides the configured path (a
    /// `Wavefront` path becomes the startup wavefront). Once ready, the
    /// calibration kinds are swapped in, a `Wavefront` path is loaded, and
    /// the mirror initialization file is locked.
    pub fn set_artifact_path(&mut self, kind: ArtifactKind, path: impl Into<PathBuf>) -> AppResult<()> {
        let path = path.into();
        if !self.context.is_ready() {
            let paths = &mut self.config.paths;
            match kind {
                ArtifactKind::MirrorInit => paths.mirror_init = path,
                ArtifactKind::Calibration => paths.calibration = path,
                ArtifactKind::CalibrationParams => paths.calibration_params = path,
                ArtifactKind::DiversityPrefs => paths.diversity_prefs = path,
                ArtifactKind::Wavefront => paths.startup_wavefront = Some(path),
            }
            debug!(kind = %kind, "Artifact path overridden");
            return Ok(());
        }

        match kind {
            ArtifactKind::MirrorInit => Err(DmError::SettingLocked("mirror_init")),
            ArtifactKind::Calibration => self.swap_calibration(&path),
            ArtifactKind::CalibrationParams => self.swap_calibration_params(&path),
            ArtifactKind::DiversityPrefs => self.swap_diversity_prefs(&path),
            ArtifactKind::Wavefront => self.load_absolute_wavefront(&path),
        }
    }

    /// Configured or active path for `kind`.
    pub fn artifact_path(&self, kind: ArtifactKind) -> Option<&Path> {
        let paths = &self.config.paths;
        match kind {
            ArtifactKind::MirrorInit => Some(paths.mirror_init.as_path()),
            ArtifactKind::Calibration => Some(paths.calibration.as_path()),
            ArtifactKind::CalibrationParams => Some(paths.calibration_params.as_path()),
            ArtifactKind::DiversityPrefs => Some(paths.diversity_prefs.as_path()),
            ArtifactKind::Wavefront => self.last_wavefront.as_deref(),
        }
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&CalibrationArtifact> {
        self.context.artifact(kind)
    }

    // ========================================================================
    // Zernike commands
    // ========================================================================

    /// Set the absolute target of `mode`, clamped to its limits.
    ///
    /// Returns the clamped target. In immediate mode the delta is dispatched
    /// before returning.
    pub fn set_mode(&mut self, mode: Mode, target: f64) -> AppResult<f64> {
        self.require_ready()?;
        let target = self.translator.request_absolute(mode, target);
        if self.config.device.dispatch_mode == DispatchMode::Immediate {
            self.dispatch_pending()?;
        }
        Ok(target)
    }

    /// Applied plus pending coefficient of `mode`.
    pub fn current_target(&self, mode: Mode) -> f64 {
        self.translator.current_target(mode)
    }

    /// Send all pending deltas as one relative command.
    ///
    /// Nothing is sent when no delta is pending.
    pub fn apply_pending(&mut self) -> AppResult<()> {
        self.require_ready()?;
        self.dispatch_pending()
    }

    fn dispatch_pending(&mut self) -> AppResult<()> {
        if !self.translator.has_pending() {
            debug!("No pending Zernike deltas");
            return Ok(());
        }

        let delta = *self.translator.pending();
        match self.context.apply_relative_delta(&delta) {
            Ok(()) => {
                self.translator.commit(true);
                debug!("Pending Zernike deltas applied");
                Ok(())
            }
            Err(err) => {
                let policy = self.config.device.commit_policy;
                if policy == CommitPolicy::DiscardOnFailure {
                    self.translator.commit(false);
                }
                warn!(error = %err, ?policy, "Relative Zernike command failed");
                Err(err)
            }
        }
    }

    pub fn applied(&self) -> &CoefficientBuffer {
        self.translator.applied()
    }

    pub fn pending(&self) -> &CoefficientBuffer {
        self.translator.pending()
    }

    // ========================================================================
    // Wavefront files
    // ========================================================================

    /// Replace the mirror shape from an absolute wavefront file.
    ///
    /// Tracked coefficients no longer describe the mirror afterwards, so both
    /// buffers are zeroed.
    pub fn load_absolute_wavefront(&mut self, path: &Path) -> AppResult<()> {
        self.context.load_absolute_wavefront(path)?;
        self.translator.reset_all();
        self.last_wavefront = Some(path.to_path_buf());
        Ok(())
    }

    /// Save the current actuator positions to `path`.
    pub fn save_current_position(&mut self, path: &Path) -> AppResult<()> {
        self.context.save_current_position(path)?;
        self.last_save = Some(path.to_path_buf());
        Ok(())
    }

    /// Save the current actuator positions to the configured save path.
    pub fn save_to_default(&mut self) -> AppResult<()> {
        let path = self.config.paths.save_path.clone();
        self.save_current_position(&path)
    }

    pub fn last_wavefront(&self) -> Option<&Path> {
        self.last_wavefront.as_deref()
    }

    pub fn last_save(&self) -> Option<&Path> {
        self.last_save.as_deref()
    }

    // ========================================================================
    // Calibration swaps
    // ========================================================================

    pub fn swap_calibration(&mut self, path: &Path) -> AppResult<()> {
        self.context.swap_calibration(path)?;
        self.config.paths.calibration = path.to_path_buf();
        Ok(())
    }

    pub fn swap_calibration_params(&mut self, path: &Path) -> AppResult<()> {
        self.context.swap_calibration_params(path)?;
        self.config.paths.calibration_params = path.to_path_buf();
        Ok(())
    }

    pub fn swap_diversity_prefs(&mut self, path: &Path) -> AppResult<()> {
        self.context.swap_diversity_prefs(path)?;
        self.config.paths.diversity_prefs = path.to_path_buf();
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let artifacts = [
            ArtifactKind::Calibration,
            ArtifactKind::CalibrationParams,
            ArtifactKind::DiversityPrefs,
        ]
        .into_iter()
        .filter_map(|kind| self.context.artifact(kind).cloned())
        .collect();

        SessionSnapshot {
            state: self.state(),
            port: self.config.device.port.clone(),
            dispatch_mode: self.config.device.dispatch_mode,
            commit_policy: self.config.device.commit_policy,
            applied: *self.translator.applied(),
            pending: *self.translator.pending(),
            mirror_init: self.config.paths.mirror_init.clone(),
            artifacts,
            engine_generation: self.context.engine_generation(),
            last_wavefront: self.last_wavefront.clone(),
            last_save: self.last_save.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::simulated::{DriverCall, SimulatedMirror, SimulationMonitor};
    use crate::driver::DriverOperation;
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn setup(mode: DispatchMode) -> (TempDir, WavefrontSession<SimulatedMirror>, SimulationMonitor) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DmConfig::default();
        config.device.dispatch_mode = mode;
        config.paths.mirror_init = dir.path().join("MIRAO_initialization.dat");
        config.paths.calibration = dir.path().join("MIRAO_calibration.aomi");
        config.paths.calibration_params = dir.path().join("Diversity_calibration.xml");
        config.paths.diversity_prefs = dir.path().join("Diversity_prefs.xml");
        config.paths.startup_wavefront = None;
        let paths = config.artifact_paths();
        for (_, path) in paths.in_check_order() {
            std::fs::write(path, "sim").unwrap();
        }

        let mirror = SimulatedMirror::with_settle_time(Duration::ZERO);
        let monitor = mirror.monitor();
        (dir, WavefrontSession::new(mirror, config), monitor)
    }

    fn relative_calls(monitor: &SimulationMonitor) -> Vec<CoefficientBuffer> {
        monitor
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::ApplyRelative(delta) => Some(delta),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn set_mode_requires_ready() {
        let (_dir, mut session, _monitor) = setup(DispatchMode::Deferred);
        assert!(matches!(session.set_mode(Mode::Tip, 0.2), Err(DmError::NotReady)));
        assert_eq!(session.current_target(Mode::Tip), 0.0);
    }

    #[test]
    fn immediate_dispatches_each_set() {
        let (_dir, mut session, monitor) = setup(DispatchMode::Immediate);
        session.initialize().unwrap();

        session.set_mode(Mode::Defocus, 0.3).unwrap();
        session.set_mode(Mode::Defocus, 0.1).unwrap();

        let sent = relative_calls(&monitor);
        assert_eq!(sent.len(), 2);
        assert!((sent[1].get(Mode::Defocus) - (-0.2)).abs() < 1e-12);
        assert!(session.pending().is_zero());
        assert!((session.applied().get(Mode::Defocus) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn retain_policy_keeps_pending_for_retry() {
        let (_dir, mut session, monitor) = setup(DispatchMode::Deferred);
        session.config.device.commit_policy = CommitPolicy::RetainOnFailure;
        session.initialize().unwrap();

        session.set_mode(Mode::Coma0, 0.4).unwrap();
        monitor.fail_next(DriverOperation::ApplyRelative);
        assert!(session.apply_pending().is_err());
        assert_eq!(session.pending().get(Mode::Coma0), 0.4);

        session.apply_pending().unwrap();
        assert_eq!(session.applied().get(Mode::Coma0), 0.4);
        assert!(session.pending().is_zero());
    }

    #[test]
    fn port_locked_after_initialize() {
        let (_dir, mut session, _monitor) = setup(DispatchMode::Deferred);
        session.set_port("COM5").unwrap();
        session.initialize().unwrap();
        assert!(matches!(session.set_port("COM6"), Err(DmError::PortChangeForbidden)));
        assert_eq!(session.port(), "COM5");

        session.shutdown();
        session.set_port("COM6").unwrap();
    }

    #[test]
    fn artifact_path_before_and_after_initialize() {
        let (dir, mut session, _monitor) = setup(DispatchMode::Deferred);
        let prefs = dir.path().join("Diversity_prefs_2.xml");
        std::fs::write(&prefs, "sim").unwrap();

        session
            .set_artifact_path(ArtifactKind::DiversityPrefs, &prefs)
            .unwrap();
        session.initialize().unwrap();
        assert_eq!(
            session.artifact(ArtifactKind::DiversityPrefs).unwrap().path,
            prefs
        );

        let err = session
            .set_artifact_path(ArtifactKind::MirrorInit, dir.path().join("other.dat"))
            .unwrap_err();
        assert!(matches!(err, DmError::SettingLocked("mirror_init")));
    }

    #[test]
    #[traced_test]
    fn startup_wavefront_failure_is_not_fatal() {
        let (dir, mut session, monitor) = setup(DispatchMode::Deferred);
        let wavefront = dir.path().join("WavefrontCorrection.wcs");
        std::fs::write(&wavefront, "not numbers").unwrap();
        session.config.paths.startup_wavefront = Some(wavefront);

        session.initialize().unwrap();
        assert!(session.is_ready());
        assert!(session.last_wavefront().is_none());
        assert_eq!(monitor.count(|c| matches!(c, DriverCall::ApplyAbsolute(_))), 1);
        assert!(logs_contain("Startup wavefront not applied"));
    }

    #[test]
    fn snapshot_serializes() {
        let (_dir, mut session, _monitor) = setup(DispatchMode::Deferred);
        session.initialize().unwrap();
        session.set_mode(Mode::Tip, 0.5).unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, ContextState::Ready);
        assert_eq!(snapshot.pending.get(Mode::Tip), 0.5);
        assert_eq!(snapshot.artifacts.len(), 3);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["dispatch_mode"], "deferred");
    }
}

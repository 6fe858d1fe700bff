//! Simulated MIRAO 52-e
//!
//! Provides an in-process mirror for testing without physical hardware or the
//! vendor SDK. The simulation is deliberately simple:
//!
//! - 52 actuators, each driven by a fixed synthetic influence function per
//!   Zernike mode (`influence[a][m] = 0.5 * sin(0.37 * (a + 1) * (m + 1))`)
//! - artifacts must be readable files; their content is not interpreted,
//!   except for wavefront files, which hold 52 whitespace-separated actuator
//!   commands (`#` starts a comment line)
//! - every call is recorded and faults can be armed per operation through a
//!   [`SimulationMonitor`]
//!
//! # Performance Characteristics
//!
//! - Relative and absolute applies block for the settle time (default 10ms)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{DriverError, DriverOperation, DriverResult, MirrorDriver, ACTUATOR_COUNT};
use crate::zernike::{CoefficientBuffer, MODE_COUNT};

/// Settle time applied after every shape change, unless overridden.
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(10);

/// A call received by the simulated driver, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Open(PathBuf),
    LoadCalibration(PathBuf),
    LoadCalibParams(PathBuf),
    LoadDivPrefs(PathBuf),
    InitDiversityEngine {
        calibration: PathBuf,
        params: PathBuf,
        prefs: PathBuf,
    },
    ApplyRelative(CoefficientBuffer),
    ApplyAbsolute(PathBuf),
    SavePositions(PathBuf),
    Close,
}

#[derive(Debug, Default)]
struct SimState {
    calls: Vec<DriverCall>,
    armed_faults: Vec<DriverOperation>,
    positions: Option<[f64; ACTUATOR_COUNT]>,
    open_handles: usize,
}

/// Observer for a [`SimulatedMirror`] that outlives the context owning it.
#[derive(Debug, Clone)]
pub struct SimulationMonitor {
    shared: Arc<Mutex<SimState>>,
}

impl SimulationMonitor {
    /// All calls received so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.shared.lock().calls.clone()
    }

    /// Number of calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.shared.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.shared.lock().calls.clear();
    }

    /// Make the next call to `operation` fail with [`DriverError::Rejected`].
    pub fn fail_next(&self, operation: DriverOperation) {
        self.shared.lock().armed_faults.push(operation);
    }

    /// Actuator positions after the last shape change, if any.
    pub fn positions(&self) -> Option<[f64; ACTUATOR_COUNT]> {
        self.shared.lock().positions
    }

    pub fn open_handles(&self) -> usize {
        self.shared.lock().open_handles
    }
}

/// Connection to the simulated mirror.
#[derive(Debug)]
pub struct SimulatedHandle {
    serial: String,
    actuators: [f64; ACTUATOR_COUNT],
}

impl SimulatedHandle {
    /// First line of the mirror initialization file.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn actuators(&self) -> &[f64; ACTUATOR_COUNT] {
        &self.actuators
    }
}

#[derive(Debug, Clone)]
struct EngineState {
    params: PathBuf,
    prefs: PathBuf,
}

/// Calibration model with its diversity engine.
#[derive(Debug)]
pub struct SimulatedCalibration {
    path: PathBuf,
    influence: Vec<[f64; MODE_COUNT]>,
    engine: Option<EngineState>,
}

impl SimulatedCalibration {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn engine_initialized(&self) -> bool {
        self.engine.is_some()
    }
}

/// Loaded diversity calibration parameters or preferences.
#[derive(Debug, Clone)]
pub struct SimulatedSettings {
    path: PathBuf,
    bytes: usize,
}

impl SimulatedSettings {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }
}

/// In-process stand-in for the vendor mirror driver.
#[derive(Debug)]
pub struct SimulatedMirror {
    settle_time: Duration,
    shared: Arc<Mutex<SimState>>,
}

impl SimulatedMirror {
    /// Create a simulated mirror with the default settle time.
    pub fn new() -> Self {
        Self::with_settle_time(DEFAULT_SETTLE_TIME)
    }

    /// Create a simulated mirror with a custom settle time.
    ///
    /// # Arguments
    /// * `settle_time` - Blocking delay after each shape change
    pub fn with_settle_time(settle_time: Duration) -> Self {
        Self {
            settle_time,
            shared: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Observer sharing this mirror's call log and fault switches.
    pub fn monitor(&self) -> SimulationMonitor {
        SimulationMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    fn enter(&self, call: DriverCall, operation: DriverOperation) -> DriverResult<()> {
        let mut state = self.shared.lock();
        state.calls.push(call);
        if let Some(pos) = state.armed_faults.iter().position(|op| *op == operation) {
            state.armed_faults.remove(pos);
            return Err(DriverError::Rejected(format!("injected {operation} fault")));
        }
        Ok(())
    }

    fn settle(&self, handle: &SimulatedHandle) {
        if !self.settle_time.is_zero() {
            std::thread::sleep(self.settle_time);
        }
        self.shared.lock().positions = Some(handle.actuators);
    }
}

impl Default for SimulatedMirror {
    fn default() -> Self {
        Self::new()
    }
}

fn synthetic_influence() -> Vec<[f64; MODE_COUNT]> {
    (0..ACTUATOR_COUNT)
        .map(|a| {
            let mut row = [0.0; MODE_COUNT];
            for (m, weight) in row.iter_mut().enumerate() {
                *weight = 0.5 * (0.37 * (a + 1) as f64 * (m + 1) as f64).sin();
            }
            row
        })
        .collect()
}

fn parse_positions(path: &Path, text: &str) -> DriverResult<[f64; ACTUATOR_COUNT]> {
    let malformed = |reason: String| DriverError::Malformed {
        path: path.display().to_string(),
        reason,
    };

    let values = text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(str::split_whitespace)
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| malformed(format!("'{token}' is not a number")))
        })
        .collect::<DriverResult<Vec<f64>>>()?;

    values
        .try_into()
        .map_err(|v: Vec<f64>| malformed(format!("expected {ACTUATOR_COUNT} actuator values, found {}", v.len())))
}

impl MirrorDriver for SimulatedMirror {
    type Handle = SimulatedHandle;
    type CalibModel = SimulatedCalibration;
    type CalibParams = SimulatedSettings;
    type DivPrefs = SimulatedSettings;

    fn open(&mut self, path: &Path) -> DriverResult<SimulatedHandle> {
        self.enter(DriverCall::Open(path.to_path_buf()), DriverOperation::Open)?;
        let text = std::fs::read_to_string(path)?;
        let serial = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("unknown")
            .to_string();

        let handle = SimulatedHandle {
            serial,
            actuators: [0.0; ACTUATOR_COUNT],
        };
        {
            let mut state = self.shared.lock();
            state.open_handles += 1;
            state.positions = Some(handle.actuators);
        }
        info!(serial = %handle.serial, "Simulated mirror opened");
        Ok(handle)
    }

    fn load_calibration(
        &mut self,
        path: &Path,
        _handle: &SimulatedHandle,
    ) -> DriverResult<SimulatedCalibration> {
        self.enter(
            DriverCall::LoadCalibration(path.to_path_buf()),
            DriverOperation::LoadCalibration,
        )?;
        std::fs::read(path)?;
        Ok(SimulatedCalibration {
            path: path.to_path_buf(),
            influence: synthetic_influence(),
            engine: None,
        })
    }

    fn load_calib_params(&mut self, path: &Path) -> DriverResult<SimulatedSettings> {
        self.enter(
            DriverCall::LoadCalibParams(path.to_path_buf()),
            DriverOperation::LoadCalibParams,
        )?;
        let bytes = std::fs::read(path)?.len();
        Ok(SimulatedSettings {
            path: path.to_path_buf(),
            bytes,
        })
    }

    fn load_div_prefs(&mut self, path: &Path) -> DriverResult<SimulatedSettings> {
        self.enter(
            DriverCall::LoadDivPrefs(path.to_path_buf()),
            DriverOperation::LoadDivPrefs,
        )?;
        let bytes = std::fs::read(path)?.len();
        Ok(SimulatedSettings {
            path: path.to_path_buf(),
            bytes,
        })
    }

    fn init_diversity_engine(
        &mut self,
        model: &mut SimulatedCalibration,
        params: &SimulatedSettings,
        prefs: &SimulatedSettings,
    ) -> DriverResult<()> {
        self.enter(
            DriverCall::InitDiversityEngine {
                calibration: model.path.clone(),
                params: params.path.clone(),
                prefs: prefs.path.clone(),
            },
            DriverOperation::InitDiversityEngine,
        )?;
        model.engine = Some(EngineState {
            params: params.path.clone(),
            prefs: prefs.path.clone(),
        });
        debug!(
            calibration = %model.path.display(),
            params = %params.path.display(),
            prefs = %prefs.path.display(),
            "Diversity engine initialized"
        );
        Ok(())
    }

    fn apply_relative(
        &mut self,
        handle: &mut SimulatedHandle,
        model: &SimulatedCalibration,
        delta: &CoefficientBuffer,
    ) -> DriverResult<()> {
        self.enter(DriverCall::ApplyRelative(*delta), DriverOperation::ApplyRelative)?;
        if model.engine.is_none() {
            return Err(DriverError::EngineNotInitialized);
        }
        for (actuator, row) in handle.actuators.iter_mut().zip(model.influence.iter()) {
            *actuator += row
                .iter()
                .zip(delta.as_slice().iter())
                .map(|(w, c)| w * c)
                .sum::<f64>();
        }
        self.settle(handle);
        Ok(())
    }

    fn apply_absolute_from_file(
        &mut self,
        handle: &mut SimulatedHandle,
        model: &SimulatedCalibration,
        path: &Path,
    ) -> DriverResult<()> {
        self.enter(
            DriverCall::ApplyAbsolute(path.to_path_buf()),
            DriverOperation::ApplyAbsolute,
        )?;
        if model.engine.is_none() {
            return Err(DriverError::EngineNotInitialized);
        }
        let text = std::fs::read_to_string(path)?;
        handle.actuators = parse_positions(path, &text)?;
        self.settle(handle);
        Ok(())
    }

    fn save_current_positions(
        &mut self,
        handle: &SimulatedHandle,
        _model: &SimulatedCalibration,
        path: &Path,
    ) -> DriverResult<()> {
        self.enter(
            DriverCall::SavePositions(path.to_path_buf()),
            DriverOperation::SavePositions,
        )?;
        let mut out = format!("# MIRAO 52-e actuator positions ({})\n", handle.serial);
        for value in handle.actuators.iter() {
            out.push_str(&format!("{value:.9}\n"));
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    fn close(&mut self, handle: SimulatedHandle) {
        let mut state = self.shared.lock();
        state.calls.push(DriverCall::Close);
        state.open_handles = state.open_handles.saturating_sub(1);
        debug!(serial = %handle.serial, "Simulated mirror closed");
    }
}

//! Host property surface.
//!
//! Microscope control hosts talk to devices through named string properties.
//! This module is the explicit table of those properties and the dispatch
//! from `get`/`set` by name into the typed [`WavefrontSession`] methods. It
//! holds no state of its own.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::driver::MirrorDriver;
use crate::error::{AppResult, ArtifactKind, DmError};
use crate::session::WavefrontSession;
use crate::zernike::Mode;

pub const DEVICE_NAME: &str = "MIRAO52E";
pub const DEVICE_DESCRIPTION: &str = "MIRAO-52E device adapter";

/// Value type of a property as presented to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Float,
    Integer,
}

/// Every property the device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProperty {
    Name,
    Description,
    Port,
    Calibration,
    CalibrationParams,
    DiversityPrefs,
    LoadWavefront,
    SaveCurrentPosition,
    Zernike(Mode),
    ApplyZernikes,
}

impl DeviceProperty {
    /// All properties in registration order.
    pub fn all() -> Vec<DeviceProperty> {
        let mut props = vec![
            DeviceProperty::Name,
            DeviceProperty::Description,
            DeviceProperty::Port,
            DeviceProperty::Calibration,
            DeviceProperty::CalibrationParams,
            DeviceProperty::DiversityPrefs,
            DeviceProperty::LoadWavefront,
            DeviceProperty::SaveCurrentPosition,
        ];
        props.extend(Mode::ALL.into_iter().map(DeviceProperty::Zernike));
        props.push(DeviceProperty::ApplyZernikes);
        props
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceProperty::Name => "Name",
            DeviceProperty::Description => "Description",
            DeviceProperty::Port => "Port",
            DeviceProperty::Calibration => "Set calibration path",
            DeviceProperty::CalibrationParams => "Set calibration params path",
            DeviceProperty::DiversityPrefs => "Set diversity preferences path",
            DeviceProperty::LoadWavefront => "Load wavefront",
            DeviceProperty::SaveCurrentPosition => "Save current position [input filename]",
            DeviceProperty::Zernike(mode) => mode.property_name(),
            DeviceProperty::ApplyZernikes => "ApplyZernikes",
        }
    }

    /// Exact, case-sensitive lookup by host name.
    pub fn from_name(name: &str) -> Option<DeviceProperty> {
        Self::all().into_iter().find(|p| p.name() == name)
    }

    pub fn kind(&self) -> PropertyKind {
        match self {
            DeviceProperty::Zernike(_) => PropertyKind::Float,
            DeviceProperty::ApplyZernikes => PropertyKind::Integer,
            _ => PropertyKind::String,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, DeviceProperty::Name | DeviceProperty::Description)
    }

    /// Only available before initialization.
    pub fn is_pre_init(&self) -> bool {
        matches!(self, DeviceProperty::Port)
    }

    pub fn limits(&self) -> Option<(f64, f64)> {
        match self {
            DeviceProperty::Zernike(mode) => Some(mode.limits()),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> PropertyDescriptor {
        PropertyDescriptor {
            name: self.name(),
            kind: self.kind(),
            read_only: self.is_read_only(),
            pre_init: self.is_pre_init(),
            limits: self.limits(),
        }
    }
}

impl fmt::Display for DeviceProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Property metadata as reported to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub read_only: bool,
    pub pre_init: bool,
    pub limits: Option<(f64, f64)>,
}

/// Descriptors of every property, in registration order.
pub fn describe_properties() -> Vec<PropertyDescriptor> {
    DeviceProperty::all().iter().map(|p| p.descriptor()).collect()
}

/// String get/set access to a device by property name.
pub trait PropertyAdapter {
    fn get_property(&self, name: &str) -> AppResult<String>;

    fn set_property(&mut self, name: &str, value: &str) -> AppResult<()>;
}

fn lookup(name: &str) -> AppResult<DeviceProperty> {
    DeviceProperty::from_name(name).ok_or_else(|| DmError::UnknownProperty(name.to_string()))
}

fn invalid(prop: DeviceProperty, value: &str) -> DmError {
    DmError::InvalidPropertyValue {
        property: prop.name().to_string(),
        value: value.to_string(),
    }
}

fn path_string(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

impl<D: MirrorDriver> PropertyAdapter for WavefrontSession<D> {
    fn get_property(&self, name: &str) -> AppResult<String> {
        let prop = lookup(name)?;
        let paths = &self.config().paths;
        let value = match prop {
            DeviceProperty::Name => DEVICE_NAME.to_string(),
            DeviceProperty::Description => DEVICE_DESCRIPTION.to_string(),
            DeviceProperty::Port => self.port().to_string(),
            DeviceProperty::Calibration => path_string(Some(paths.calibration.as_path())),
            DeviceProperty::CalibrationParams => path_string(Some(paths.calibration_params.as_path())),
            DeviceProperty::DiversityPrefs => path_string(Some(paths.diversity_prefs.as_path())),
            DeviceProperty::LoadWavefront => {
                path_string(self.last_wavefront().or(paths.startup_wavefront.as_deref()))
            }
            DeviceProperty::SaveCurrentPosition => {
                path_string(self.last_save().or(Some(paths.save_path.as_path())))
            }
            DeviceProperty::Zernike(mode) => self.current_target(mode).to_string(),
            DeviceProperty::ApplyZernikes => "0".to_string(),
        };
        Ok(value)
    }

    fn set_property(&mut self, name: &str, value: &str) -> AppResult<()> {
        let prop = lookup(name)?;
        let raw = value;
        let value = value.trim();
        match prop {
            DeviceProperty::Name | DeviceProperty::Description => Err(DmError::SettingLocked(prop.name())),
            DeviceProperty::Port => self.set_port(value),
            DeviceProperty::Calibration => self.set_artifact_path(ArtifactKind::Calibration, value),
            DeviceProperty::CalibrationParams => {
                self.set_artifact_path(ArtifactKind::CalibrationParams, value)
            }
            DeviceProperty::DiversityPrefs => self.set_artifact_path(ArtifactKind::DiversityPrefs, value),
            DeviceProperty::LoadWavefront => self.set_artifact_path(ArtifactKind::Wavefront, value),
            DeviceProperty::SaveCurrentPosition => {
                if value.is_empty() {
                    self.save_to_default()
                } else {
                    self.save_current_position(Path::new(value))
                }
            }
            DeviceProperty::Zernike(mode) => {
                let target: f64 = value.parse().map_err(|_| invalid(prop, raw))?;
                if target.is_nan() {
                    return Err(invalid(prop, raw));
                }
                self.set_mode(mode, target).map(|_| ())
            }
            DeviceProperty::ApplyZernikes => {
                // any integer triggers the apply
                value.parse::<i64>().map_err(|_| invalid(prop, raw))?;
                self.apply_pending()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DmConfig;
    use crate::driver::simulated::{DriverCall, SimulatedMirror, SimulationMonitor};
    use std::collections::HashSet;
    use std::time::Duration;
    use tempfile::TempDir;

    fn ready_session() -> (TempDir, WavefrontSession<SimulatedMirror>, SimulationMonitor) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DmConfig::default();
        config.paths.mirror_init = dir.path().join("MIRAO_initialization.dat");
        config.paths.calibration = dir.path().join("MIRAO_calibration.aomi");
        config.paths.calibration_params = dir.path().join("Diversity_calibration.xml");
        config.paths.diversity_prefs = dir.path().join("Diversity_prefs.xml");
        config.paths.startup_wavefront = None;
        config.paths.save_path = dir.path().join("WavefrontCorrection_save.wcs");
        let paths = config.artifact_paths();
        for (_, path) in paths.in_check_order() {
            std::fs::write(path, "sim").unwrap();
        }

        let mirror = SimulatedMirror::with_settle_time(Duration::ZERO);
        let monitor = mirror.monitor();
        let mut session = WavefrontSession::new(mirror, config);
        session.initialize().unwrap();
        (dir, session, monitor)
    }

    #[test]
    fn property_table_is_total() {
        let props = DeviceProperty::all();
        let names: HashSet<&str> = props.iter().map(|p| p.name()).collect();
        assert_eq!(names.len(), props.len());
        for mode in Mode::ALL {
            let prop = DeviceProperty::from_name(mode.property_name()).unwrap();
            assert_eq!(prop, DeviceProperty::Zernike(mode));
            assert_eq!(prop.limits(), Some((-1.0, 1.0)));
        }
        assert_eq!(
            DeviceProperty::from_name("Save current position [input filename]"),
            Some(DeviceProperty::SaveCurrentPosition)
        );
        assert_eq!(DeviceProperty::from_name("z20"), None);
    }

    #[test]
    fn zernike_set_and_apply_through_properties() {
        let (_dir, mut session, monitor) = ready_session();
        session.set_property("Z20", "0.25").unwrap();
        session.set_property("Z3-1", "2.0").unwrap();
        assert_eq!(session.get_property("Z20").unwrap(), "0.25");
        assert_eq!(session.get_property("Z3-1").unwrap(), "1");
        assert_eq!(monitor.count(|c| matches!(c, DriverCall::ApplyRelative(_))), 0);

        session.set_property("ApplyZernikes", "1").unwrap();
        assert_eq!(monitor.count(|c| matches!(c, DriverCall::ApplyRelative(_))), 1);
        assert!(session.pending().is_zero());
    }

    #[test]
    fn parse_errors_name_the_property() {
        let (_dir, mut session, _monitor) = ready_session();
        let err = session.set_property("Z11", "abc").unwrap_err();
        assert!(matches!(err, DmError::InvalidPropertyValue { ref property, .. } if property == "Z11"));
        assert!(session.set_property("Z11", "NaN").is_err());
        assert!(session.set_property("ApplyZernikes", "yes").is_err());
        assert!(matches!(
            session.get_property("Z99"),
            Err(DmError::UnknownProperty(_))
        ));
    }

    #[test]
    fn port_and_read_only_properties() {
        let (_dir, mut session, _monitor) = ready_session();
        assert_eq!(session.get_property("Port").unwrap(), "Undefined");
        assert!(matches!(
            session.set_property("Port", "COM1"),
            Err(DmError::PortChangeForbidden)
        ));
        assert_eq!(session.get_property("Name").unwrap(), DEVICE_NAME);
        assert!(matches!(
            session.set_property("Name", "other"),
            Err(DmError::SettingLocked("Name"))
        ));
    }

    #[test]
    fn save_position_defaults_to_configured_path() {
        let (_dir, mut session, _monitor) = ready_session();
        let default = session.config().paths.save_path.clone();
        session.set_property("Save current position [input filename]", "").unwrap();
        assert!(default.is_file());
        assert_eq!(
            session.get_property("Save current position [input filename]").unwrap(),
            default.display().to_string()
        );
    }

    #[test]
    fn missing_calibration_file_reports_code() {
        let (dir, mut session, _monitor) = ready_session();
        let missing = dir.path().join("missing.aomi");
        let err = session
            .set_property("Set calibration path", missing.to_str().unwrap())
            .unwrap_err();
        assert_eq!(err.code(), 10202);
    }
}

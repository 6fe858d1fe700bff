//! Zernike modes and coefficient buffers.
//!
//! The mirror is commanded in a basis of 19 Zernike polynomials. Each mode has
//! a fixed index (1..=19) that the diversity engine uses to address its
//! coefficient vector, and a short property name (`Z11`, `Z1-1`, ...) that
//! follows the `Z{n}{m}` radial/azimuthal convention.
//!
//! [`CoefficientBuffer`] is a plain value type holding one coefficient per
//! mode. It has no error conditions and no side effects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of Zernike modes controlled by the mirror.
pub const MODE_COUNT: usize = 19;

/// Lower bound of a user-facing target coefficient.
pub const MIN_COEFFICIENT: f64 = -1.0;

/// Upper bound of a user-facing target coefficient.
pub const MAX_COEFFICIENT: f64 = 1.0;

/// A named Zernike term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Tip,
    Tilt,
    Defocus,
    Astig0,
    Astig45,
    Coma0,
    Coma90,
    PrimarySpherical,
    Trefoil0,
    Trefoil90,
    SecondAstig0,
    SecondAstig45,
    SecondComa0,
    SecondComa90,
    SecondSpherical,
    Quadrafoil0,
    Quadrafoil45,
    SecondTrefoil0,
    SecondTrefoil90,
}

impl Mode {
    /// All modes in index order.
    pub const ALL: [Mode; MODE_COUNT] = [
        Mode::Tip,
        Mode::Tilt,
        Mode::Defocus,
        Mode::Astig0,
        Mode::Astig45,
        Mode::Coma0,
        Mode::Coma90,
        Mode::PrimarySpherical,
        Mode::Trefoil0,
        Mode::Trefoil90,
        Mode::SecondAstig0,
        Mode::SecondAstig45,
        Mode::SecondComa0,
        Mode::SecondComa90,
        Mode::SecondSpherical,
        Mode::Quadrafoil0,
        Mode::Quadrafoil45,
        Mode::SecondTrefoil0,
        Mode::SecondTrefoil90,
    ];

    /// Index of this mode in the diversity engine's coefficient vector (1-based).
    pub fn index(self) -> usize {
        self as usize + 1
    }

    /// Look up a mode by its 1-based index.
    pub fn from_index(index: usize) -> Option<Mode> {
        index.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    /// Host property name (`Z{n}{m}`).
    pub fn property_name(self) -> &'static str {
        match self {
            Mode::Tip => "Z11",
            Mode::Tilt => "Z1-1",
            Mode::Defocus => "Z20",
            Mode::Astig0 => "Z22",
            Mode::Astig45 => "Z2-2",
            Mode::Coma0 => "Z31",
            Mode::Coma90 => "Z3-1",
            Mode::PrimarySpherical => "Z40",
            Mode::Trefoil0 => "Z33",
            Mode::Trefoil90 => "Z3-3",
            Mode::SecondAstig0 => "Z42",
            Mode::SecondAstig45 => "Z4-2",
            Mode::SecondComa0 => "Z51",
            Mode::SecondComa90 => "Z5-1",
            Mode::SecondSpherical => "Z60",
            Mode::Quadrafoil0 => "Z44",
            Mode::Quadrafoil45 => "Z4-4",
            Mode::SecondTrefoil0 => "Z53",
            Mode::SecondTrefoil90 => "Z5-3",
        }
    }

    /// Look up a mode by its host property name.
    pub fn from_property_name(name: &str) -> Option<Mode> {
        Self::ALL.into_iter().find(|m| m.property_name() == name)
    }

    /// Snake-case identifier, the same one serde uses.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Tip => "tip",
            Mode::Tilt => "tilt",
            Mode::Defocus => "defocus",
            Mode::Astig0 => "astig0",
            Mode::Astig45 => "astig45",
            Mode::Coma0 => "coma0",
            Mode::Coma90 => "coma90",
            Mode::PrimarySpherical => "primary_spherical",
            Mode::Trefoil0 => "trefoil0",
            Mode::Trefoil90 => "trefoil90",
            Mode::SecondAstig0 => "second_astig0",
            Mode::SecondAstig45 => "second_astig45",
            Mode::SecondComa0 => "second_coma0",
            Mode::SecondComa90 => "second_coma90",
            Mode::SecondSpherical => "second_spherical",
            Mode::Quadrafoil0 => "quadrafoil0",
            Mode::Quadrafoil45 => "quadrafoil45",
            Mode::SecondTrefoil0 => "second_trefoil0",
            Mode::SecondTrefoil90 => "second_trefoil90",
        }
    }

    /// Inclusive range accepted for a target coefficient of this mode.
    pub fn limits(self) -> (f64, f64) {
        (MIN_COEFFICIENT, MAX_COEFFICIENT)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no Zernike mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown Zernike mode '{0}'")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    /// Accepts the snake-case name (`defocus`), the property name (`Z20`)
    /// or the numeric index (`3`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(mode) = Mode::from_property_name(s) {
            return Ok(mode);
        }
        if let Ok(index) = s.parse::<usize>() {
            return Mode::from_index(index).ok_or_else(|| UnknownMode(s.to_string()));
        }
        let lower = s.to_ascii_lowercase();
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == lower)
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

/// One coefficient per Zernike mode.
///
/// Never-set modes read as `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoefficientBuffer {
    coefficients: [f64; MODE_COUNT],
}

impl CoefficientBuffer {
    /// The all-zero buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a buffer from `(mode, value)` pairs; later pairs win.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Mode, f64)>,
    {
        let mut buffer = Self::new();
        for (mode, value) in pairs {
            buffer.set(mode, value);
        }
        buffer
    }

    pub fn get(&self, mode: Mode) -> f64 {
        self.coefficients[mode as usize]
    }

    pub fn set(&mut self, mode: Mode, value: f64) {
        self.coefficients[mode as usize] = value;
    }

    /// Element-wise sum.
    pub fn add(&self, other: &CoefficientBuffer) -> CoefficientBuffer {
        let mut sum = *self;
        for (lhs, rhs) in sum.coefficients.iter_mut().zip(other.coefficients.iter()) {
            *lhs += rhs;
        }
        sum
    }

    /// Set all coefficients to zero.
    pub fn reset(&mut self) {
        self.coefficients = [0.0; MODE_COUNT];
    }

    /// Bound `value` to the legal range of `mode`. NaN maps to `0.0`.
    pub fn clamp(mode: Mode, value: f64) -> f64 {
        if value.is_nan() {
            return 0.0;
        }
        let (min, max) = mode.limits();
        value.clamp(min, max)
    }

    pub fn is_zero(&self) -> bool {
        self.coefficients.iter().all(|c| *c == 0.0)
    }

    /// Coefficients in index order, for dispatch to the driver.
    pub fn as_slice(&self) -> &[f64; MODE_COUNT] {
        &self.coefficients
    }

    pub fn iter(&self) -> impl Iterator<Item = (Mode, f64)> + '_ {
        Mode::ALL.into_iter().zip(self.coefficients.iter().copied())
    }
}

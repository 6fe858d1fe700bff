//! Core library for the MIRAO 52-e deformable mirror controller.
//!
//! The mirror is commanded in Zernike modes. Callers set absolute targets per
//! mode; the diversity engine behind the vendor driver only accepts relative
//! commands, so this crate tracks what has been applied, what is pending, and
//! which calibration artifacts the engine was initialized with.
//!
//! Layers, leaf first:
//!
//! - [`zernike`]: the 19 modes and the coefficient buffer
//! - [`translator`]: absolute target to relative delta bookkeeping
//! - [`driver`]: the vendor driver seam and a simulated mirror
//! - [`context`]: mirror handle plus calibration triple
//! - [`session`]: the caller-facing protocol
//! - [`property`]: string property surface for control hosts
//! - [`actor`]: request queue serializing concurrent callers
//!
//! # Example
//!
//! ```no_run
//! use mirao_dm::{config::DmConfig, driver::simulated::SimulatedMirror};
//! use mirao_dm::{session::WavefrontSession, zernike::Mode};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = DmConfig::load()?;
//!     let mut session = WavefrontSession::new(SimulatedMirror::new(), config);
//!     session.initialize()?;
//!     session.set_mode(Mode::Defocus, 0.2)?;
//!     session.apply_pending()?;
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod property;
pub mod session;
pub mod translator;
pub mod zernike;

pub use error::{AppResult, DmError};
pub use session::WavefrontSession;
pub use zernike::{CoefficientBuffer, Mode};

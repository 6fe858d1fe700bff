//! Absolute-target to relative-delta translation.
//!
//! The diversity engine only accepts *relative* Zernike commands, while
//! callers think in absolute targets. [`CommandTranslator`] keeps two buffers:
//!
//! - `applied`: coefficients believed to be physically realized on the mirror
//! - `pending`: relative deltas accumulated but not yet dispatched
//!
//! and maintains `applied[m] + pending[m] == current_target(m)` for every mode.

use tracing::trace;

use crate::zernike::{CoefficientBuffer, Mode};

/// Tracks applied and pending Zernike coefficients.
#[derive(Debug, Clone, Default)]
pub struct CommandTranslator {
    applied: CoefficientBuffer,
    pending: CoefficientBuffer,
}

impl CommandTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an absolute target for `mode` as a pending relative delta.
    ///
    /// The target is clamped to the mode's limits first. Any delta still
    /// pending for the same mode is overwritten, other modes are untouched.
    /// Returns the clamped target.
    pub fn request_absolute(&mut self, mode: Mode, target: f64) -> f64 {
        let target = CoefficientBuffer::clamp(mode, target);
        let delta = target - self.applied.get(mode);
        self.pending.set(mode, delta);
        trace!(mode = %mode, target, delta, "Pending delta updated");
        target
    }

    /// Value a caller observes for `mode`: applied plus pending.
    pub fn current_target(&self, mode: Mode) -> f64 {
        self.applied.get(mode) + self.pending.get(mode)
    }

    /// Close out a dispatch of the pending buffer.
    ///
    /// On success the pending deltas are merged into `applied`. `pending` is
    /// cleared either way.
    pub fn commit(&mut self, delta_applied_successfully: bool) {
        if delta_applied_successfully {
            self.applied = self.applied.add(&self.pending);
        }
        self.pending.reset();
    }

    /// Forget all tracked state, e.g. after an absolute wavefront load.
    pub fn reset_all(&mut self) {
        self.applied.reset();
        self.pending.reset();
    }

    pub fn applied(&self) -> &CoefficientBuffer {
        &self.applied
    }

    pub fn pending(&self) -> &CoefficientBuffer {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_zero()
    }
}

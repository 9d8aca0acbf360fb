//! Bit-packed cancellation codes.
//!
//! A [`CancelCode`] is a 32-bit value with a fixed layout, kept stable so that
//! codes can be logged, compared and carried across process boundaries:
//!
//! | bits      | meaning                                   |
//! |-----------|-------------------------------------------|
//! | `[0,20)`  | reason, `0` means "not cancelling"        |
//! | `[20,24)` | urgency degree                            |
//! | `28`      | interrupt requested                       |
//! | `29`      | skip removal-on-cancel bookkeeping        |

use crate::error::FutureError;

use std::fmt;

/// A structured cancellation code: reason, urgency degree and behaviour flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CancelCode(u32);

impl CancelCode {
    /// Mask of the reason bits.
    pub const REASON_MASK: u32 = (1 << 20) - 1;
    /// Offset of the degree bits.
    pub const DEGREE_SHIFT: u32 = 20;
    /// Mask of the degree bits.
    pub const DEGREE_MASK: u32 = 0xF << Self::DEGREE_SHIFT;
    /// Largest representable degree.
    pub const MAX_DEGREE: u32 = 15;
    /// Interrupt-requested flag.
    pub const INTERRUPT_FLAG: u32 = 1 << 28;
    /// Skip-removal flag.
    pub const WITHOUT_REMOVE_FLAG: u32 = 1 << 29;

    /// Reason used when none is specified.
    pub const REASON_DEFAULT: u32 = 1;
    /// Reason used when a timer cancels on behalf of the caller.
    pub const REASON_TIMEOUT: u32 = 2;
    /// Reason used when an event loop shuts down with work still queued.
    pub const REASON_SHUTDOWN: u32 = 3;

    /// The "not cancelling" code.
    pub const NONE: CancelCode = CancelCode(0);
    /// Cancellation with the default reason.
    pub const DEFAULT: CancelCode = CancelCode(Self::REASON_DEFAULT);
    /// Cancellation caused by a timer.
    pub const TIMEOUT: CancelCode = CancelCode(Self::REASON_TIMEOUT);
    /// Cancellation caused by executor shutdown.
    pub const SHUTDOWN: CancelCode = CancelCode(Self::REASON_SHUTDOWN);

    /// Creates a code with the given reason and no flags.
    ///
    /// Fails with [`FutureError::InvalidArgument`] when the reason is zero or
    /// does not fit in the reason bits.
    pub fn new(reason: u32) -> Result<Self, FutureError> {
        if reason == 0 || reason > Self::REASON_MASK {
            return Err(FutureError::InvalidArgument(format!(
                "cancel reason must be in 1..={}, got {}",
                Self::REASON_MASK,
                reason
            )));
        }
        Ok(Self(reason))
    }

    /// Reinterprets raw bits as a code without validation.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns a copy with the given urgency degree, clamped to [`Self::MAX_DEGREE`].
    pub const fn with_degree(self, degree: u32) -> Self {
        let degree = if degree > Self::MAX_DEGREE {
            Self::MAX_DEGREE
        } else {
            degree
        };
        Self((self.0 & !Self::DEGREE_MASK) | (degree << Self::DEGREE_SHIFT))
    }

    /// Returns a copy that requests interruption of running work.
    pub const fn with_interrupt(self) -> Self {
        Self(self.0 | Self::INTERRUPT_FLAG)
    }

    /// Returns a copy that asks schedulers not to eagerly unlink cancelled tasks.
    pub const fn without_remove(self) -> Self {
        Self(self.0 | Self::WITHOUT_REMOVE_FLAG)
    }

    pub const fn reason(self) -> u32 {
        self.0 & Self::REASON_MASK
    }

    pub const fn degree(self) -> u32 {
        (self.0 & Self::DEGREE_MASK) >> Self::DEGREE_SHIFT
    }

    /// Returns true for any code with a nonzero reason.
    pub const fn is_cancelling(self) -> bool {
        self.reason() != 0
    }

    pub const fn is_interruptible(self) -> bool {
        self.0 & Self::INTERRUPT_FLAG != 0
    }

    pub const fn is_without_remove(self) -> bool {
        self.0 & Self::WITHOUT_REMOVE_FLAG != 0
    }

    /// Validates that this code may be used to request cancellation.
    pub(crate) fn check_cancelling(self) -> Result<Self, FutureError> {
        if self.is_cancelling() {
            Ok(self)
        } else {
            Err(FutureError::InvalidArgument(format!(
                "cancel code {:#x} has no reason",
                self.0
            )))
        }
    }
}

impl fmt::Debug for CancelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelCode")
            .field("reason", &self.reason())
            .field("degree", &self.degree())
            .field("interrupt", &self.is_interruptible())
            .field("without_remove", &self.is_without_remove())
            .finish()
    }
}

impl From<CancelCode> for u32 {
    fn from(code: CancelCode) -> Self {
        code.0
    }
}

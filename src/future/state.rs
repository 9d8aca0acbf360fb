use crate::cancel::CancelCode;
use crate::error::{BoxError, FutureError};

/// Lifecycle state of a future.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FutureState {
    /// Not started.
    Pending,
    /// Claimed by the producer that is computing the value.
    Computing,
    /// Completed with a value.
    Success,
    /// Completed with an error.
    Failed,
    /// Completed by cancellation.
    Cancelled,
}

impl FutureState {
    /// Returns true for the three terminal states.
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    pub const fn is_failed_or_cancelled(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

/// The terminal payload of a future.
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    Success(T),
    Failed(FutureError),
    Cancelled(CancelCode),
}

impl<T> Outcome<T> {
    pub fn state(&self) -> FutureState {
        match self {
            Self::Success(_) => FutureState::Success,
            Self::Failed(_) => FutureState::Failed,
            Self::Cancelled(_) => FutureState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Converts into a `Result`, reporting cancellation as [`FutureError::Cancelled`].
    pub fn into_result(self) -> Result<T, FutureError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failed(error) => Err(error),
            Self::Cancelled(code) => Err(FutureError::Cancelled(code)),
        }
    }

    pub fn as_ref(&self) -> Outcome<&T> {
        match self {
            Self::Success(value) => Outcome::Success(value),
            Self::Failed(error) => Outcome::Failed(error.clone()),
            Self::Cancelled(code) => Outcome::Cancelled(*code),
        }
    }

    /// The outcome of a fallible user function.
    pub(crate) fn from_user(result: Result<T, BoxError>) -> Self {
        match result.map_err(FutureError::from_user) {
            Ok(value) => Self::Success(value),
            Err(FutureError::Cancelled(code)) if code.is_cancelling() => Self::Cancelled(code),
            Err(error) => Self::Failed(error),
        }
    }

    /// Splits off the value, or re-types the failure for forwarding downstream.
    pub(crate) fn into_value<U>(self) -> Result<T, Outcome<U>> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failed(error) => Err(Outcome::Failed(error)),
            Self::Cancelled(code) => Err(Outcome::Cancelled(code)),
        }
    }
}

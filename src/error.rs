//! Error types shared by promises, cancellation tokens and the event loop.
//!
//! Every failure a consumer can observe on a completed future is a [`FutureError`].
//! The type is cheap to clone so that one failed future can hand the same error
//! to any number of continuations and readers.
//!
//! # Categories
//!
//! - **Invalid transitions**: [`FutureError::AlreadyCompleted`], [`FutureError::IllegalState`],
//!   [`FutureError::InvalidArgument`]
//! - **Cancellation**: [`FutureError::Cancelled`], carrying the structured [`CancelCode`]
//! - **Timeout**: [`FutureError::Timeout`], a dedicated marker for exhausted task budgets
//! - **Executor**: [`FutureError::Rejected`], [`FutureError::BlockingInEventLoop`]
//! - **User failures**: [`FutureError::Failed`] and [`FutureError::Panicked`]

use crate::cancel::CancelCode;

use std::any::Any;
use std::error::Error;
use std::sync::Arc;

/// Error type returned by user work and callbacks that can fail.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// The failure payload of a completed future, or the reason an operation on it was refused.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FutureError {
    /// The future is not in the state the operation requires.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// A non-`try` completion was attempted on a future that is already terminal.
    #[error("future already completed")]
    AlreadyCompleted,

    /// An argument was rejected, such as a cancel code with a zero reason.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The future was cancelled with the given code.
    #[error("cancelled with reason {}", .0.reason())]
    Cancelled(CancelCode),

    /// A scheduled task exhausted its timeout budget.
    #[error("task timed out")]
    Timeout,

    /// The target executor has shut down and refused the job.
    #[error("executor rejected the job")]
    Rejected,

    /// A blocking wait was attempted on the thread of the event loop the future is bound to.
    #[error("blocking wait inside the event loop that must complete the future")]
    BlockingInEventLoop,

    /// A user callback or task panicked; the panic message is preserved.
    #[error("completed with panic: {0}")]
    Panicked(String),

    /// A user-supplied failure.
    #[error("{0}")]
    Failed(Arc<dyn Error + Send + Sync + 'static>),
}

impl FutureError {
    /// Wraps an arbitrary error as a user failure.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(Arc::from(error.into()))
    }

    /// Converts the error returned by a fallible user function.
    ///
    /// A boxed [`FutureError`] is unwrapped as is, so a cancellation raised by
    /// `token.check_cancel()?` stays a cancellation. Anything else becomes
    /// [`FutureError::Failed`].
    pub(crate) fn from_user(error: BoxError) -> Self {
        match error.downcast::<FutureError>() {
            Ok(error) => *error,
            Err(error) => Self::failed(error),
        }
    }

    /// Converts a payload caught by `catch_unwind` into [`FutureError::Panicked`].
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked(crate::utils::panic_message(payload.as_ref()))
    }

    /// Returns true if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this error is the timeout marker.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns the cancel code if this error represents a cancellation.
    pub fn cancel_code(&self) -> Option<CancelCode> {
        match self {
            Self::Cancelled(code) => Some(*code),
            _ => None,
        }
    }

    /// Attempts to view the user failure as a concrete error type.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Failure reported by a [`FutureCombiner`](crate::FutureCombiner) when too few inputs succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("only {succeeded} of the {required} required futures succeeded")]
pub struct CombineError {
    /// Number of inputs that succeeded.
    pub succeeded: usize,
    /// Number of successes the selection required.
    pub required: usize,
}

//! Small internal helpers.

pub(crate) mod slab;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Runs a callback, logging instead of propagating a panic.
///
/// Used at every site where user continuations are fired, so a failing
/// continuation never unwinds into the thread driving completion.
pub(crate) fn run_logged(site: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            site,
            panic = %panic_message(payload.as_ref()),
            "callback panicked"
        );
    }
}

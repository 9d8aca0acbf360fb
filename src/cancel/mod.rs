//! Hierarchical cancellation signals.
//!
//! A [`CancelTokenSource`] owns the right to cancel; the [`CancelToken`] it hands
//! out is a read-only capability that any number of components may observe.
//! Cancellation is one-way and one-time: the first code written wins and every
//! listener fires exactly once, in registration order.
//!
//! Tokens compose into trees with [`CancelToken::then_transfer_to`] or
//! [`CancelToken::child`], so cancelling a parent cancels every scoped
//! sub-operation with the same code.

pub mod code;
pub mod source;

pub use code::CancelCode;
pub use source::{CancelListener, CancelToken, CancelTokenSource};

//! Completable values: promises (write side) and deferreds (read side).
//!
//! Two implementations share one state machine:
//!
//! - [`Promise`] / [`Deferred`]: synchronized, safe to complete from any thread.
//!   The state slot is an atomic tag, the continuation chain is multi-producer and
//!   each continuation is claimed with a compare-and-swap.
//! - [`LocalPromise`]: confined to one thread (it is `!Send`), used by code that
//!   already runs entirely on an event loop. It skips every atomic operation.
//!
//! ```text
//! Pending -> Computing -> { Success | Failed | Cancelled }
//!    \__________________________/^
//! ```
//!
//! A terminal state and its payload are written exactly once.

pub mod combiner;
pub mod local;
pub mod promise;
pub mod stage;
pub mod state;

pub use combiner::FutureCombiner;
pub use local::{LocalPromise, LocalWait};
pub use promise::{Deferred, Promise, Wait};
pub use stage::Stage;
pub use state::{FutureState, Outcome};

/// Bound shared by every value carried by a synchronized future.
///
/// Values are cloned out to each reader, so a completed future can be observed
/// by any number of continuations on any thread.
pub trait FutureValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> FutureValue for T {}

//! Promises, hierarchical cancellation and a single-threaded reactor scheduler.
//!
//! This crate provides the primitives to express "run later", "run when X
//! completes" and "run periodically until cancelled or timed out" without
//! threads blocking on each other: continuations are chained on completable
//! values and fired by whichever component drives completion.
//!
//! # Architecture
//!
//! - **Promise / Deferred**: write and read side of a thread-safe future
//! - **LocalPromise**: the same contract for values confined to one thread
//! - **Stage**: combinators (`then_apply`, `catching`, ...) targeting an executor
//! - **FutureCombiner**: any-of, N-of-M and all-of aggregation
//! - **CancelTokenSource / CancelToken**: one-time cancellation signals with listeners
//! - **EventLoop**: reactor draining an immediate queue and a time-ordered task heap
//! - **LoopHandle**: thread-safe access to a loop, and its `Executor` implementation
//! - **EventLoopBuilder**: fluent construction of owned or spawned loops
//!
//! # Example
//!
//! ```ignore
//! use reactor_promise::{EventLoopBuilder, Work};
//! use std::time::Duration;
//!
//! let event_loop = EventLoopBuilder::new().build();
//! let handle = event_loop.handle();
//!
//! let answer = handle
//!     .schedule(Work::action(|| 21), Duration::from_millis(10))
//!     .then_apply(|n| n * 2);
//!
//! assert_eq!(event_loop.block_on(&answer).unwrap(), 42);
//! ```

mod builder;
pub mod cancel;
mod chain;
pub mod error;
pub mod future;
pub mod runtime;
pub mod time;
mod utils;

pub use builder::EventLoopBuilder;
pub use cancel::{CancelCode, CancelListener, CancelToken, CancelTokenSource};
pub use chain::Registration;
pub use chain::local::LocalRegistration;
pub use error::{BoxError, CombineError, FutureError};
pub use future::{
    Deferred, FutureCombiner, FutureState, FutureValue, LocalPromise, LocalWait, Outcome, Promise,
    Stage, Wait,
};
pub use runtime::{
    EventLoop, Executor, Job, LoopHandle, Runnable, ScheduleKind, TaskBuilder, TaskContext,
    TaskId, TaskOptions, TaskTimeout, Work, default_loop, job, shutdown_default_loop,
};
pub use time::{Clock, ManualClock, SystemClock};

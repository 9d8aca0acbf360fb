//! The time domain of an event loop.
//!
//! Scheduled tasks never read the system time directly. Every trigger time is a
//! [`Duration`](std::time::Duration) offset produced by the loop's [`Clock`], so
//! all tasks of one loop share a single monotonic time line.
//!
//! - [`SystemClock`] follows [`Instant`](std::time::Instant) and is the default.
//! - [`ManualClock`] only moves when told to, which makes scheduling order and
//!   trigger-time sequences reproducible in tests.
//!
//! # Example: Deterministic Ticks
//!
//! ```ignore
//! use reactor_promise::{EventLoopBuilder, ManualClock, Work};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(ManualClock::new());
//! let event_loop = EventLoopBuilder::new().clock(clock.clone()).build();
//! let fired = event_loop.handle().schedule(Work::action(|| 1), Duration::from_millis(5));
//!
//! event_loop.run_once();
//! assert!(!fired.is_done());
//!
//! clock.advance(Duration::from_millis(5));
//! event_loop.run_once();
//! assert!(fired.is_done());
//! ```

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

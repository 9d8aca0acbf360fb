//! Runtime subsystem modules.

pub(crate) mod context;
pub mod core;
pub mod driver;
pub mod executor;
pub mod handle;
pub(crate) mod heap;
pub(crate) mod queue;
pub mod task;

pub use self::core::EventLoop;
pub use driver::{default_loop, shutdown_default_loop};
pub use executor::{Executor, Job, Runnable, TaskOptions, job};
pub use handle::LoopHandle;
pub use task::{ScheduleKind, TaskBuilder, TaskContext, TaskId, TaskTimeout, Work};

//! The executor seam used by continuations and listeners.
//!
//! Anything that can run a [`Job`] later, on some thread, implements [`Executor`].
//! The event loop's [`LoopHandle`](crate::LoopHandle) is the main implementation,
//! but the completion chain only depends on this trait.

use crate::error::FutureError;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A unit of work handed to an [`Executor`].
///
/// `reject` is invoked instead of `run` when the executor cannot accept the job
/// (for example after shutdown), so that work which owns a promise can still
/// drive it to a terminal state.
pub trait Runnable: Send + 'static {
    /// Runs the job.
    fn run(self: Box<Self>);

    /// Called instead of [`Runnable::run`] when the job will never run.
    fn reject(self: Box<Self>, error: FutureError) {
        tracing::warn!(%error, "job dropped without running");
    }
}

/// A boxed [`Runnable`].
pub type Job = Box<dyn Runnable>;

struct FnJob<F>(F);

impl<F> Runnable for FnJob<F>
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (self.0)()
    }
}

/// Wraps a closure as a [`Job`].
pub fn job<F>(f: F) -> Job
where
    F: FnOnce() + Send + 'static,
{
    Box::new(FnJob(f))
}

/// Something that runs jobs, typically on a thread it owns.
pub trait Executor: Send + Sync {
    /// Queues a job. Implementations call [`Runnable::reject`] if they cannot accept it.
    fn execute(&self, job: Job, options: TaskOptions);

    /// Returns true when called from the thread this executor runs jobs on.
    fn in_event_loop(&self) -> bool;
}

/// Per-call scheduling options.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaskOptions(u32);

impl TaskOptions {
    /// No options.
    pub const NONE: TaskOptions = TaskOptions(0);
    /// Run a continuation inline when already on the target executor's thread.
    pub const STAGE_TRY_INLINE: TaskOptions = TaskOptions(1);
    /// Keep rescheduling a periodic task after one of its runs fails.
    pub const TOLERATE_FAILURE: TaskOptions = TaskOptions(1 << 1);
    /// Check a periodic task's timeout budget before each run instead of after it.
    pub const TIMEOUT_BEFORE_RUN: TaskOptions = TaskOptions(1 << 2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: TaskOptions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: TaskOptions) -> TaskOptions {
        TaskOptions(self.0 | other.0)
    }
}

impl BitOr for TaskOptions {
    type Output = TaskOptions;

    fn bitor(self, rhs: TaskOptions) -> TaskOptions {
        self.union(rhs)
    }
}

impl BitOrAssign for TaskOptions {
    fn bitor_assign(&mut self, rhs: TaskOptions) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.contains(Self::STAGE_TRY_INLINE) {
            set.entry(&"STAGE_TRY_INLINE");
        }
        if self.contains(Self::TOLERATE_FAILURE) {
            set.entry(&"TOLERATE_FAILURE");
        }
        if self.contains(Self::TIMEOUT_BEFORE_RUN) {
            set.entry(&"TIMEOUT_BEFORE_RUN");
        }
        set.finish()
    }
}

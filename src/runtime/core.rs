//! The reactor: a single-threaded loop over an immediate queue and a task heap.
//!
//! One tick does, in order:
//!
//! 1. fire every scheduled task due at the tick time, earliest first,
//! 2. drain the immediate queue (only what was queued when the drain began),
//! 3. re-read the clock and fire due tasks again, so work scheduled by step 2
//!    does not wait for the next tick.
//!
//! The task heap is owned by the loop thread. No borrow of it is held while
//! user code runs, so jobs and continuations may freely schedule more work.

use crate::cancel::CancelCode;
use crate::error::FutureError;
use crate::future::{Deferred, FutureValue};
use crate::runtime::context::{LoopContext, enter_context};
use crate::runtime::handle::{LoopHandle, Shared};
use crate::runtime::heap::TaskHeap;
use crate::runtime::queue::Command;
use crate::time::Clock;
use crate::utils::run_logged;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Loop-thread state, reachable from the thread-local context during a tick.
pub(crate) struct Core {
    pub(crate) heap: TaskHeap,
    pub(crate) tick_time: Duration,
}

/// A reactor executor driven by the thread that created it.
///
/// The loop is `!Send`: it is driven by [`EventLoop::run_once`] and friends on
/// its own thread, while other threads reach it through a [`LoopHandle`].
/// Use [`EventLoopBuilder::spawn`](crate::EventLoopBuilder::spawn) to get a loop
/// with a dedicated driver thread.
pub struct EventLoop {
    shared: Arc<Shared>,
    core: Rc<RefCell<Core>>,
}

impl EventLoop {
    pub(crate) fn new(name: String, clock: Arc<dyn Clock>, idle_park: Duration) -> Self {
        let shared = Shared::new(name, clock, idle_park);
        tracing::debug!(name = %shared.name, id = shared.id, "event loop created");

        Self {
            shared,
            core: Rc::new(RefCell::new(Core {
                heap: TaskHeap::new(),
                tick_time: Duration::ZERO,
            })),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle::new(self.shared.clone())
    }

    /// Time at which the most recent pass over the task heap started.
    pub fn tick_time(&self) -> Duration {
        self.core.borrow().tick_time
    }

    /// Number of tasks waiting in the time-ordered heap.
    pub fn pending_tasks(&self) -> usize {
        self.core.borrow().heap.len()
    }

    /// Number of commands waiting in the immediate queue.
    pub fn queued_jobs(&self) -> usize {
        self.shared.queue.len()
    }

    /// Runs one tick and returns how many jobs and tasks it processed.
    ///
    /// After shutdown was requested the tick instead finalizes the loop.
    pub fn run_once(&self) -> usize {
        if self.shared.is_shutdown() {
            self.finalize();
            return 0;
        }

        enter_context(self.context(), || {
            let mut processed = self.run_due(self.shared.clock.now());
            processed += self.drain_queue();
            processed += self.run_due(self.shared.clock.now());
            processed
        })
    }

    /// Ticks until nothing is immediately runnable. Returns the work processed.
    pub fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while !self.shared.is_shutdown() && self.has_ready_work() {
            processed += self.run_once();
        }
        processed
    }

    /// Ticks until `deferred` completes or the loop shuts down.
    ///
    /// Parks between ticks while nothing is due. Completion from another
    /// thread wakes the loop right away.
    pub fn run_until<T: FutureValue>(&self, deferred: &Deferred<T>) {
        let shared = Arc::downgrade(&self.shared);
        let wake = deferred.on_completion(move |_| {
            if let Some(shared) = shared.upgrade() {
                shared.unpark();
            }
        });

        while !deferred.is_done() {
            if self.shared.is_shutdown() {
                self.finalize();
                break;
            }

            self.run_once();
            if !deferred.is_done() && !self.has_ready_work() {
                self.park_idle();
            }
        }

        wake.dispose();
    }

    /// Drives the loop until `deferred` completes and returns its result.
    pub fn block_on<T: FutureValue>(&self, deferred: &Deferred<T>) -> Result<T, FutureError> {
        self.run_until(deferred);
        match deferred.outcome() {
            Some(outcome) => outcome.into_result(),
            None => Err(FutureError::Rejected),
        }
    }

    /// Runs until shutdown, parking while idle.
    pub fn run(&self) {
        tracing::debug!(name = %self.shared.name, "event loop running");

        while !self.shared.is_shutdown() {
            self.run_once();

            if self.shared.is_shutdown() {
                break;
            }
            if !self.has_ready_work() {
                self.park_idle();
            }
        }

        self.finalize();
    }

    /// Shuts the loop down now, from its own thread.
    pub fn shutdown(&self) {
        self.handle().shutdown();
        self.finalize();
    }

    fn context(&self) -> LoopContext {
        LoopContext {
            id: self.shared.id,
            core: self.core.clone(),
        }
    }

    fn has_ready_work(&self) -> bool {
        if !self.shared.queue.is_empty() {
            return true;
        }
        let next = self.core.borrow().heap.next_trigger();
        next.is_some_and(|trigger| trigger <= self.shared.clock.now())
    }

    fn park_idle(&self) {
        let idle_park = self.shared.idle_park;
        let next = self.core.borrow().heap.next_trigger();
        let timeout = match next {
            Some(trigger) => trigger
                .saturating_sub(self.shared.clock.now())
                .min(idle_park),
            None => idle_park,
        };

        if !timeout.is_zero() {
            self.shared.park(timeout);
        }
    }

    fn run_due(&self, now: Duration) -> usize {
        self.core.borrow_mut().tick_time = now;

        let clock = &*self.shared.clock;
        let mut requeue = Vec::new();
        let mut fired = 0;

        loop {
            let due = self.core.borrow_mut().heap.pop_due(now);
            let Some(mut task) = due else {
                break;
            };

            fired += 1;
            if task.fire(now, clock) {
                requeue.push(task);
            }
        }

        // Rescheduled tasks that are already due wait for the next pass.
        let mut core = self.core.borrow_mut();
        for task in requeue {
            core.heap.push(task);
        }

        fired
    }

    fn drain_queue(&self) -> usize {
        let budget = self.shared.queue.len();
        let mut processed = 0;

        while processed < budget {
            let Some(command) = self.shared.queue.pop() else {
                break;
            };
            processed += 1;

            match command {
                Command::Run(job) => run_logged("job", move || job.run()),
                // Its unschedule request may have been queued ahead of it.
                Command::Schedule(task) if task.is_done() => drop(task),
                Command::Schedule(task) => self.core.borrow_mut().heap.push(task),
                Command::Unschedule(id) => {
                    let removed = self.core.borrow_mut().heap.remove(id);
                    drop(removed);
                }
            }
        }

        processed
    }

    /// Rejects queued jobs, cancels scheduled tasks and marks the loop terminated.
    fn finalize(&self) {
        if self.shared.is_terminated() {
            return;
        }
        self.shared.queue.shutdown();

        let tasks = self.core.borrow_mut().heap.drain();
        let mut rejected = self.shared.reject_queued();

        let cancelled = tasks.len();
        for mut task in tasks {
            task.cancel(CancelCode::SHUTDOWN);
        }

        self.shared.mark_terminated();
        rejected += self.shared.reject_queued();

        tracing::debug!(
            name = %self.shared.name,
            rejected,
            cancelled,
            "event loop terminated"
        );
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.shared.name)
            .field("pending_tasks", &self.pending_tasks())
            .field("queued_jobs", &self.queued_jobs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::future::Promise;
    use crate::runtime::task::{ScheduledTask, TaskBuilder, TaskId, Work};
    use crate::time::ManualClock;

    fn manual_loop() -> EventLoop {
        EventLoop::new(
            "core-test".to_owned(),
            Arc::new(ManualClock::new()),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_unschedule_queued_ahead_of_its_task() {
        let event_loop = manual_loop();
        let promise = Promise::<()>::new();
        let task = ScheduledTask::new(
            TaskId(7),
            TaskBuilder::once(Work::action(|| ())).delay(Duration::from_secs(3600)),
            Duration::ZERO,
            promise.clone(),
        );

        // Cancelled from another thread before the task reached the loop.
        promise.try_set_cancelled(CancelCode::DEFAULT);
        event_loop.shared.push(Command::Unschedule(TaskId(7)));
        event_loop.shared.push(Command::Schedule(Box::new(task)));

        event_loop.run_once();
        assert_eq!(event_loop.pending_tasks(), 0, "cancelled task never enters the heap");
        assert!(promise.is_cancelled());
    }

    #[test]
    fn test_live_task_still_reaches_the_heap() {
        let event_loop = manual_loop();
        let task = ScheduledTask::new(
            TaskId(1),
            TaskBuilder::once(Work::action(|| ())).delay(Duration::from_secs(1)),
            Duration::ZERO,
            Promise::<()>::new(),
        );

        event_loop.shared.push(Command::Schedule(Box::new(task)));
        event_loop.run_once();
        assert_eq!(event_loop.pending_tasks(), 1);
    }
}

//! Thread-safe handle to an event loop.
//!
//! [`LoopHandle`] is how every other thread (and every completion continuation)
//! talks to a loop: it queues jobs, submits scheduled tasks and requests
//! shutdown. It is also the loop's [`Executor`] implementation.
//!
//! # Usage
//!
//! Scheduling calls never touch the task heap from a foreign thread. On the
//! loop thread, inside a tick, a task goes straight into the heap; anywhere
//! else it is queued as a command and picked up by the next drain.
//!
//! # Example
//! ```ignore
//! let handle = EventLoopBuilder::new().name("timers").spawn()?;
//! let heartbeat = handle.schedule_fixed_rate(
//!     Work::action(|| send_heartbeat()),
//!     Duration::ZERO,
//!     Duration::from_secs(5),
//! )?;
//! // Later: stops the heartbeat and removes it from the heap.
//! heartbeat.cancel(CancelCode::DEFAULT);
//! ```

use crate::cancel::CancelCode;
use crate::error::FutureError;
use crate::future::{Deferred, FutureValue, Promise};
use crate::runtime::context::with_current_core;
use crate::runtime::executor::{Executor, Job, Runnable, TaskOptions};
use crate::runtime::queue::{Command, JobQueue};
use crate::runtime::task::{Schedulable, ScheduledTask, TaskBuilder, TaskId, Work};
use crate::time::Clock;

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

/// Wakes a parked loop thread.
struct Parker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn park(&self, timeout: Duration) {
        let mut notified = self.notified.lock();
        if !*notified {
            self.condvar.wait_for(&mut notified, timeout);
        }
        *notified = false;
    }

    fn unpark(&self) {
        *self.notified.lock() = true;
        self.condvar.notify_one();
    }
}

/// State shared between an [`EventLoop`](crate::EventLoop) and its handles.
pub(crate) struct Shared {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) queue: JobQueue,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) idle_park: Duration,
    owner: ThreadId,
    parker: Parker,
    next_seq: AtomicU64,
    terminated: AtomicBool,
    termination: (Mutex<()>, Condvar),
}

impl Shared {
    /// Creates the shared state of a loop owned by the calling thread.
    pub(crate) fn new(name: String, clock: Arc<dyn Clock>, idle_park: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed),
            name,
            queue: JobQueue::new(),
            clock,
            idle_park,
            owner: thread::current().id(),
            parker: Parker::new(),
            next_seq: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            termination: (Mutex::new(()), Condvar::new()),
        })
    }

    pub(crate) fn in_event_loop(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.queue.is_shutdown()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn park(&self, timeout: Duration) {
        self.parker.park(timeout);
    }

    pub(crate) fn push(&self, command: Command) {
        if self.is_shutdown() {
            reject(command);
            return;
        }

        self.queue.push(command);
        self.parker.unpark();

        // The loop may have finished its final drain between the check above and the push.
        if self.is_terminated() {
            self.reject_queued();
        }
    }

    pub(crate) fn reject_queued(&self) -> usize {
        let mut rejected = 0;
        while let Some(command) = self.queue.pop() {
            reject(command);
            rejected += 1;
        }
        rejected
    }

    fn schedule(&self, task: Box<dyn Schedulable>) {
        let mut slot = Some(task);
        with_current_core(self.id, |core| {
            // A task cancelled before reaching the heap has nothing left to do.
            if let Some(task) = slot.take()
                && !task.is_done()
            {
                core.heap.push(task);
            }
        });

        if let Some(task) = slot {
            self.push(Command::Schedule(task));
        }
    }

    pub(crate) fn unpark(&self) {
        self.parker.unpark();
    }

    fn unschedule(&self, id: TaskId) {
        match with_current_core(self.id, |core| core.heap.remove(id)) {
            Some(removed) => drop(removed),
            None => self.push(Command::Unschedule(id)),
        }
    }

    fn shutdown(&self) {
        if self.queue.shutdown() {
            tracing::debug!(name = %self.name, "event loop shutdown requested");
        }
        self.parker.unpark();
    }

    pub(crate) fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        let _guard = self.termination.0.lock();
        self.termination.1.notify_all();
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.termination.0.lock();
        while !self.is_terminated() {
            if self
                .termination
                .1
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.is_terminated();
            }
        }
        true
    }
}

/// Disposes of a command that will never be processed.
pub(crate) fn reject(command: Command) {
    match command {
        Command::Run(job) => job.reject(FutureError::Rejected),
        Command::Schedule(mut task) => task.cancel(CancelCode::SHUTDOWN),
        Command::Unschedule(_) => {}
    }
}

struct SubmitJob<T, F> {
    promise: Promise<T>,
    f: F,
}

impl<T, F> Runnable for SubmitJob<T, F>
where
    T: FutureValue,
    F: FnOnce() -> T + Send + 'static,
{
    fn run(self: Box<Self>) {
        let SubmitJob { promise, f } = *self;
        if !promise.try_set_computing() {
            return;
        }

        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => promise.try_set_result(value),
            Err(payload) => promise.try_set_exception(FutureError::from_panic(payload)),
        };
    }

    fn reject(self: Box<Self>, error: FutureError) {
        self.promise.try_set_exception(error);
    }
}

/// Cloneable, thread-safe handle to an event loop.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// A handle to a loop that was never started. It rejects everything.
    pub(crate) fn closed(name: String) -> Self {
        let shared = Shared::new(
            name,
            Arc::new(crate::time::SystemClock::new()),
            Duration::ZERO,
        );
        shared.shutdown();
        shared.mark_terminated();
        Self { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current time of the loop's clock.
    pub fn now(&self) -> Duration {
        self.shared.clock.now()
    }

    /// Returns true on the thread that runs this loop.
    pub fn in_event_loop(&self) -> bool {
        self.shared.in_event_loop()
    }

    /// This handle as a shareable [`Executor`].
    pub fn executor(&self) -> Arc<dyn Executor> {
        Arc::new(self.clone())
    }

    /// Queues `f` to run on the loop. Dropped with a warning after shutdown.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.push(Command::Run(crate::runtime::executor::job(f)));
    }

    /// Queues `f` and returns a future of its result.
    ///
    /// After shutdown the future fails with [`FutureError::Rejected`]; a panic
    /// in `f` fails it with [`FutureError::Panicked`].
    pub fn submit<T, F>(&self, f: F) -> Deferred<T>
    where
        T: FutureValue,
        F: FnOnce() -> T + Send + 'static,
    {
        let promise = Promise::with_executor(self.executor());
        let deferred = promise.deferred();
        self.shared
            .push(Command::Run(Box::new(SubmitJob { promise, f })));
        deferred
    }

    /// Runs `work` once after `delay`.
    pub fn schedule<T: FutureValue>(&self, work: Work<T>, delay: Duration) -> Deferred<T> {
        self.enqueue(TaskBuilder::once(work).delay(delay))
    }

    /// Runs `work` every `period`, starting after `delay`.
    ///
    /// Each trigger time is the previous one plus `period`, so a loop that
    /// fell behind runs the missed firings back to back on later ticks. The
    /// returned future stays `Computing` until the task is cancelled or fails.
    /// A zero `period` is rejected with [`FutureError::InvalidArgument`].
    pub fn schedule_fixed_rate(
        &self,
        work: Work<()>,
        delay: Duration,
        period: Duration,
    ) -> Result<Deferred<()>, FutureError> {
        self.submit_task(TaskBuilder::fixed_rate(work, period).delay(delay))
    }

    /// Runs `work` repeatedly, waiting `period` after each run finishes.
    ///
    /// Time spent running the work pushes every later firing back. A zero
    /// `period` is rejected with [`FutureError::InvalidArgument`].
    pub fn schedule_fixed_delay(
        &self,
        work: Work<()>,
        delay: Duration,
        period: Duration,
    ) -> Result<Deferred<()>, FutureError> {
        self.submit_task(TaskBuilder::fixed_delay(work, period).delay(delay))
    }

    /// Schedules a fully configured task.
    ///
    /// Fails with [`FutureError::InvalidArgument`] for a zero period or a zero
    /// count budget.
    pub fn submit_task<T: FutureValue>(
        &self,
        builder: TaskBuilder<T>,
    ) -> Result<Deferred<T>, FutureError> {
        builder.validate()?;
        Ok(self.enqueue(builder))
    }

    fn enqueue<T: FutureValue>(&self, builder: TaskBuilder<T>) -> Deferred<T> {
        let promise = Promise::with_executor(self.executor());
        let deferred = promise.deferred();

        if self.shared.is_shutdown() {
            promise.try_set_cancelled(CancelCode::SHUTDOWN);
            return deferred;
        }

        let id = TaskId(self.shared.next_seq.fetch_add(1, Ordering::Relaxed));
        let task = ScheduledTask::new(id, builder, self.shared.clock.now(), promise);

        // Already cancelled through its token; nothing to queue.
        if deferred.is_done() {
            return deferred;
        }

        let shared = Arc::downgrade(&self.shared);
        let _ = deferred.on_completion(move |_| {
            if let Some(shared) = shared.upgrade() {
                shared.unschedule(id);
            }
        });

        self.shared.schedule(Box::new(task));
        deferred
    }

    /// Requests shutdown. Queued jobs are rejected and scheduled tasks are
    /// cancelled with [`CancelCode::SHUTDOWN`] once the loop thread notices.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Returns true once the loop has finished rejecting and cancelling its work.
    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Blocks until the loop terminates or `timeout` elapses. Returns whether it terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.shared.await_termination(timeout)
    }
}

impl Executor for LoopHandle {
    fn execute(&self, job: Job, _options: TaskOptions) {
        self.shared.push(Command::Run(job));
    }

    fn in_event_loop(&self) -> bool {
        self.shared.in_event_loop()
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("name", &self.shared.name)
            .field("shutdown", &self.shared.is_shutdown())
            .finish()
    }
}

//! Scheduled tasks: a unit of work, a trigger time and a rescheduling policy.
//!
//! A task owns exactly one promise. One-shot tasks complete it with the work's
//! result. Periodic tasks claim it on their first run, keep it `Computing`
//! while they are rescheduled and complete it only when they stop: cancelled,
//! failed, or out of budget.

use crate::cancel::{CancelCode, CancelToken};
use crate::chain::Registration;
use crate::error::{BoxError, FutureError};
use crate::future::{FutureValue, Promise};
use crate::runtime::executor::TaskOptions;
use crate::time::Clock;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

/// Identifier of a scheduled task, also its submission sequence number.
///
/// Tasks due at the same time fire in ascending id order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// What a running task can observe about itself.
#[derive(Clone, Debug)]
pub struct TaskContext {
    token: CancelToken,
    trigger_time: Duration,
    tick_time: Duration,
    run_count: u32,
}

impl TaskContext {
    /// The token the task was scheduled with, or [`CancelToken::none`].
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// The logical time this run was due.
    pub fn trigger_time(&self) -> Duration {
        self.trigger_time
    }

    /// The loop time of the tick executing this run.
    pub fn tick_time(&self) -> Duration {
        self.tick_time
    }

    /// Number of earlier runs of the same task.
    pub fn run_count(&self) -> u32 {
        self.run_count
    }
}

/// A unit of work, in one of four calling conventions.
///
/// Fallible variants return a [`BoxError`]. Returning a [`FutureError::Cancelled`]
/// (for example through `context.token().check_cancel()?`) completes the task as
/// cancelled rather than failed.
pub enum Work<T> {
    Action(Box<dyn FnMut() -> T + Send>),
    Function(Box<dyn FnMut() -> Result<T, BoxError> + Send>),
    ActionWithContext(Box<dyn FnMut(&TaskContext) -> T + Send>),
    FunctionWithContext(Box<dyn FnMut(&TaskContext) -> Result<T, BoxError> + Send>),
}

impl<T> Work<T> {
    pub fn action<F>(f: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        Self::Action(Box::new(f))
    }

    pub fn function<F>(f: F) -> Self
    where
        F: FnMut() -> Result<T, BoxError> + Send + 'static,
    {
        Self::Function(Box::new(f))
    }

    pub fn action_with_context<F>(f: F) -> Self
    where
        F: FnMut(&TaskContext) -> T + Send + 'static,
    {
        Self::ActionWithContext(Box::new(f))
    }

    pub fn function_with_context<F>(f: F) -> Self
    where
        F: FnMut(&TaskContext) -> Result<T, BoxError> + Send + 'static,
    {
        Self::FunctionWithContext(Box::new(f))
    }

    fn call(&mut self, context: &TaskContext) -> Result<T, FutureError> {
        let result = catch_unwind(AssertUnwindSafe(|| match self {
            Self::Action(f) => Ok(f()),
            Self::Function(f) => f(),
            Self::ActionWithContext(f) => Ok(f(context)),
            Self::FunctionWithContext(f) => f(context),
        }));

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(FutureError::from_user(error)),
            Err(payload) => Err(FutureError::from_panic(payload)),
        }
    }
}

impl<T> fmt::Debug for Work<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Action(_) => "Action",
            Self::Function(_) => "Function",
            Self::ActionWithContext(_) => "ActionWithContext",
            Self::FunctionWithContext(_) => "FunctionWithContext",
        };
        f.write_str(kind)
    }
}

/// How a task is rescheduled after a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Runs once.
    Once,
    /// Next run is `period` after the previous run finished; delays accumulate.
    FixedDelay(Duration),
    /// Next run is `period` after the previous logical trigger time; late runs catch up.
    FixedRate(Duration),
}

impl ScheduleKind {
    pub fn is_periodic(self) -> bool {
        !matches!(self, Self::Once)
    }
}

/// Budget after which a periodic task stops with [`FutureError::Timeout`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskTimeout {
    #[default]
    Unbounded,
    /// At most this many runs.
    Count(u32),
    /// Runs until this much time has passed since the first trigger time.
    Duration(Duration),
}

/// Everything needed to schedule a task on an event loop.
///
/// ```ignore
/// let ticks = handle.submit_task(
///     TaskBuilder::fixed_rate(Work::action(|| tick()), Duration::from_millis(100))
///         .timeout(TaskTimeout::Count(3))
///         .token(source.token()),
/// )?;
/// ```
pub struct TaskBuilder<T> {
    work: Work<T>,
    kind: ScheduleKind,
    delay: Duration,
    timeout: TaskTimeout,
    token: Option<CancelToken>,
    options: TaskOptions,
}

impl<T> TaskBuilder<T> {
    /// A one-shot task, due immediately unless [`TaskBuilder::delay`] says otherwise.
    pub fn once(work: Work<T>) -> Self {
        Self {
            work,
            kind: ScheduleKind::Once,
            delay: Duration::ZERO,
            timeout: TaskTimeout::Unbounded,
            token: None,
            options: TaskOptions::NONE,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancels the task when `token` is cancelled.
    pub fn token(mut self, token: CancelToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub(crate) fn validate(&self) -> Result<(), FutureError> {
        match self.kind {
            ScheduleKind::FixedDelay(period) | ScheduleKind::FixedRate(period)
                if period.is_zero() =>
            {
                return Err(FutureError::InvalidArgument(
                    "period of a periodic task must be positive".to_owned(),
                ));
            }
            _ => {}
        }

        if self.timeout == TaskTimeout::Count(0) {
            return Err(FutureError::InvalidArgument(
                "timeout count must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

impl TaskBuilder<()> {
    pub fn fixed_rate(work: Work<()>, period: Duration) -> Self {
        Self {
            kind: ScheduleKind::FixedRate(period),
            ..Self::once(work)
        }
    }

    pub fn fixed_delay(work: Work<()>, period: Duration) -> Self {
        Self {
            kind: ScheduleKind::FixedDelay(period),
            ..Self::once(work)
        }
    }

    /// Limits how long a periodic task keeps running.
    pub fn timeout(mut self, timeout: TaskTimeout) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A task as stored by the event loop, erased over its result type.
pub(crate) trait Schedulable: Send {
    fn id(&self) -> TaskId;

    fn trigger_time(&self) -> Duration;

    /// Returns true once the task's promise is complete; such a task never runs again.
    fn is_done(&self) -> bool;

    /// Runs the task if it is still live. Returns true if it must be requeued.
    fn fire(&mut self, tick_time: Duration, clock: &dyn Clock) -> bool;

    /// Completes the task's promise as cancelled without running it.
    fn cancel(&mut self, code: CancelCode);
}

pub(crate) struct ScheduledTask<T> {
    id: TaskId,
    work: Work<T>,
    kind: ScheduleKind,
    trigger_time: Duration,
    deadline: Option<Duration>,
    remaining: Option<u32>,
    run_count: u32,
    options: TaskOptions,
    promise: Promise<T>,
    token: Option<CancelToken>,
    token_registration: Option<Registration>,
}

impl<T: FutureValue> ScheduledTask<T> {
    pub(crate) fn new(id: TaskId, builder: TaskBuilder<T>, now: Duration, promise: Promise<T>) -> Self {
        let trigger_time = now.saturating_add(builder.delay);
        let (deadline, remaining) = match builder.timeout {
            TaskTimeout::Unbounded => (None, None),
            TaskTimeout::Count(count) => (None, Some(count)),
            TaskTimeout::Duration(budget) => (Some(trigger_time.saturating_add(budget)), None),
        };

        let token_registration = builder.token.as_ref().map(|token| {
            let promise = promise.clone();
            // Tokens asking to skip removal leave the task to be found when it is due.
            token.then_accept(move |token| {
                if !token.is_without_remove() {
                    promise.try_set_cancelled(token.code());
                }
            })
        });

        Self {
            id,
            work: builder.work,
            kind: builder.kind,
            trigger_time,
            deadline,
            remaining,
            run_count: 0,
            options: builder.options,
            promise,
            token: builder.token,
            token_registration,
        }
    }

    fn cancelled_code(&self) -> Option<CancelCode> {
        self.token
            .as_ref()
            .map(CancelToken::code)
            .filter(|code| code.is_cancelling())
    }

    fn context(&self, tick_time: Duration) -> TaskContext {
        TaskContext {
            token: self.token.clone().unwrap_or_else(CancelToken::none),
            trigger_time: self.trigger_time,
            tick_time,
            run_count: self.run_count,
        }
    }

    fn budget_exhausted(&self, now: Duration) -> bool {
        self.remaining == Some(0) || self.deadline.is_some_and(|deadline| now >= deadline)
    }

    fn run_once(&mut self, tick_time: Duration) {
        if !self.promise.try_set_computing() {
            return;
        }

        let context = self.context(tick_time);
        match self.work.call(&context) {
            Ok(value) => {
                self.promise.try_set_result(value);
            }
            Err(FutureError::Cancelled(code)) => {
                self.promise.try_set_cancelled(code);
            }
            Err(error) => {
                self.promise.try_set_exception(error);
            }
        }
    }

    fn run_periodic(&mut self, tick_time: Duration, clock: &dyn Clock) -> bool {
        if self.run_count == 0 && !self.promise.try_set_computing() {
            return false;
        }

        let timeout_before_run = self.options.contains(TaskOptions::TIMEOUT_BEFORE_RUN);
        if timeout_before_run && self.budget_exhausted(tick_time) {
            self.promise.try_set_exception(FutureError::Timeout);
            return false;
        }

        let context = self.context(tick_time);
        let result = self.work.call(&context);
        self.run_count += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }

        match result {
            Ok(_) => {}
            Err(FutureError::Cancelled(code)) => {
                self.promise.try_set_cancelled(code);
                return false;
            }
            Err(error) if self.options.contains(TaskOptions::TOLERATE_FAILURE) => {
                tracing::warn!(task = self.id.0, %error, "periodic task failed, rescheduling");
            }
            Err(error) => {
                self.promise.try_set_exception(error);
                return false;
            }
        }

        if let Some(code) = self.cancelled_code() {
            self.promise.try_set_cancelled(code);
            return false;
        }
        if !self.promise.is_computing() {
            return false;
        }

        let finished_at = clock.now();
        if !timeout_before_run && self.budget_exhausted(finished_at) {
            self.promise.try_set_exception(FutureError::Timeout);
            return false;
        }

        self.trigger_time = match self.kind {
            ScheduleKind::FixedRate(period) => self.trigger_time.saturating_add(period),
            ScheduleKind::FixedDelay(period) => finished_at.saturating_add(period),
            ScheduleKind::Once => return false,
        };
        true
    }
}

impl<T: FutureValue> Schedulable for ScheduledTask<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn trigger_time(&self) -> Duration {
        self.trigger_time
    }

    fn is_done(&self) -> bool {
        self.promise.is_done()
    }

    fn fire(&mut self, tick_time: Duration, clock: &dyn Clock) -> bool {
        if self.promise.is_done() {
            return false;
        }
        if let Some(code) = self.cancelled_code() {
            self.promise.try_set_cancelled(code);
            return false;
        }

        if self.kind.is_periodic() {
            self.run_periodic(tick_time, clock)
        } else {
            self.run_once(tick_time);
            false
        }
    }

    fn cancel(&mut self, code: CancelCode) {
        self.promise.try_set_cancelled(code);
    }
}

impl<T> Drop for ScheduledTask<T> {
    fn drop(&mut self) {
        if let Some(registration) = self.token_registration.take() {
            registration.dispose();
        }
    }
}

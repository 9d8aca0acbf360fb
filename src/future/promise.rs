//! Synchronized promise and its read side.
//!
//! The state lives in one atomic tag. A completing producer first moves the tag
//! to an internal `COMPLETING` marker with a compare-and-swap, which makes it the
//! only writer of the payload slot, then publishes the terminal tag and fires
//! the continuation chain. Racing producers observe the marker and fail.

use super::FutureValue;
use super::state::{FutureState, Outcome};
use crate::cancel::CancelCode;
use crate::chain::Registration;
use crate::chain::sync::{Continuation, FnContinuation, Node, SyncChain};
use crate::error::FutureError;
use crate::runtime::executor::{Executor, TaskOptions};

use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

const PENDING: u8 = 0;
const COMPUTING: u8 = 1;
const COMPLETING: u8 = 2;
const SUCCESS: u8 = 3;
const FAILED: u8 = 4;
const CANCELLED: u8 = 5;

struct Inner<T> {
    state: AtomicU8,
    outcome: OnceLock<Outcome<T>>,
    chain: SyncChain<Deferred<T>>,
    executor: Option<Arc<dyn Executor>>,
}

/// Read side of a synchronized future.
///
/// Cloning is cheap; all clones observe the same completion.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

/// Write side of a synchronized future.
///
/// Dereferences to [`Deferred`], so a promise can also be observed directly.
pub struct Promise<T> {
    deferred: Deferred<T>,
}

impl<T: FutureValue> Promise<T> {
    pub fn new() -> Self {
        Self::with_inner(None)
    }

    /// Creates a promise bound to the executor expected to complete it.
    ///
    /// Blocking waits on the executor's own thread are refused with
    /// [`FutureError::BlockingInEventLoop`], and inline continuations derived
    /// from the promise inherit the binding.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self::with_inner(Some(executor))
    }

    pub(crate) fn bound_to(executor: Option<Arc<dyn Executor>>) -> Self {
        Self::with_inner(executor)
    }

    fn with_inner(executor: Option<Arc<dyn Executor>>) -> Self {
        Self {
            deferred: Deferred {
                inner: Arc::new(Inner {
                    state: AtomicU8::new(PENDING),
                    outcome: OnceLock::new(),
                    chain: SyncChain::new(),
                    executor,
                }),
            },
        }
    }

    /// Returns a read-only handle.
    pub fn deferred(&self) -> Deferred<T> {
        self.deferred.clone()
    }

    /// Moves `Pending` to `Computing`. Fails if the promise was already started or completed.
    pub fn try_set_computing(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, COMPUTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn set_computing(&self) -> Result<(), FutureError> {
        if self.try_set_computing() {
            Ok(())
        } else {
            Err(FutureError::IllegalState("promise is not pending"))
        }
    }

    pub fn try_set_result(&self, value: T) -> bool {
        self.try_complete(Outcome::Success(value))
    }

    pub fn try_set_exception(&self, error: FutureError) -> bool {
        self.try_complete(Outcome::Failed(error))
    }

    /// Completes as cancelled. Returns false for a code without a reason.
    pub fn try_set_cancelled(&self, code: CancelCode) -> bool {
        code.is_cancelling() && self.try_complete(Outcome::Cancelled(code))
    }

    pub fn set_result(&self, value: T) -> Result<(), FutureError> {
        self.complete_or_raise(Outcome::Success(value))
    }

    pub fn set_exception(&self, error: FutureError) -> Result<(), FutureError> {
        self.complete_or_raise(Outcome::Failed(error))
    }

    pub fn set_cancelled(&self, code: CancelCode) -> Result<(), FutureError> {
        let code = code.check_cancelling()?;
        self.complete_or_raise(Outcome::Cancelled(code))
    }

    /// Completes with an arbitrary outcome. Only the first completion succeeds.
    pub fn try_complete(&self, outcome: Outcome<T>) -> bool {
        self.deferred.complete(outcome)
    }

    /// Completes with the outcome of another, already completed, future.
    pub(crate) fn try_transfer_from(&self, source: &Deferred<T>) -> bool {
        match source.outcome() {
            Some(outcome) => self.try_complete(outcome),
            None => false,
        }
    }

    fn complete_or_raise(&self, outcome: Outcome<T>) -> Result<(), FutureError> {
        if self.try_complete(outcome) {
            Ok(())
        } else {
            Err(FutureError::AlreadyCompleted)
        }
    }
}

impl<T: FutureValue> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for Promise<T> {
    type Target = Deferred<T>;

    fn deref(&self) -> &Deferred<T> {
        &self.deferred
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: FutureValue> Deferred<T> {
    /// A future already completed with `value`.
    pub fn succeeded(value: T) -> Self {
        let promise = Promise::new();
        promise.try_set_result(value);
        promise.deferred()
    }

    /// A future already failed with `error`.
    pub fn failed(error: FutureError) -> Self {
        let promise = Promise::new();
        promise.try_set_exception(error);
        promise.deferred()
    }

    /// A future already cancelled with `code` (the default code if `code` has no reason).
    pub fn cancelled(code: CancelCode) -> Self {
        let promise = Promise::new();
        let code = if code.is_cancelling() {
            code
        } else {
            CancelCode::DEFAULT
        };
        promise.try_set_cancelled(code);
        promise.deferred()
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        let inner = &self.inner;
        let mut current = inner.state.load(Ordering::Acquire);

        loop {
            if current >= COMPLETING {
                return false;
            }
            match inner.state.compare_exchange_weak(
                current,
                COMPLETING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let terminal = match &outcome {
            Outcome::Success(_) => SUCCESS,
            Outcome::Failed(_) => FAILED,
            Outcome::Cancelled(_) => CANCELLED,
        };

        // Only the CAS winner reaches this point, so the slot is still empty.
        let _ = inner.outcome.set(outcome);
        inner.state.store(terminal, Ordering::Release);
        inner.chain.fire_all(self.clone());

        true
    }

    pub fn state(&self) -> FutureState {
        match self.inner.state.load(Ordering::Acquire) {
            PENDING => FutureState::Pending,
            COMPUTING | COMPLETING => FutureState::Computing,
            SUCCESS => FutureState::Success,
            FAILED => FutureState::Failed,
            _ => FutureState::Cancelled,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == FutureState::Pending
    }

    pub fn is_computing(&self) -> bool {
        self.state() == FutureState::Computing
    }

    pub fn is_succeeded(&self) -> bool {
        self.state() == FutureState::Success
    }

    pub fn is_failed(&self) -> bool {
        self.state() == FutureState::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    pub fn is_failed_or_cancelled(&self) -> bool {
        self.state().is_failed_or_cancelled()
    }

    /// The executor this future is bound to, if any.
    pub fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.inner.executor.as_ref()
    }

    /// Returns a copy of the terminal payload, or `None` while not done.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        if self.is_done() {
            self.inner.outcome.get().cloned()
        } else {
            None
        }
    }

    /// Borrows the terminal payload without cloning the value.
    pub fn with_outcome<R>(&self, f: impl FnOnce(&Outcome<T>) -> R) -> Option<R> {
        if self.is_done() {
            self.inner.outcome.get().map(f)
        } else {
            None
        }
    }

    /// Returns the value; fails with [`FutureError::IllegalState`] unless succeeded.
    pub fn result_now(&self) -> Result<T, FutureError> {
        match self.outcome() {
            Some(Outcome::Success(value)) => Ok(value),
            _ => Err(FutureError::IllegalState("future has not succeeded")),
        }
    }

    /// Returns the failure.
    ///
    /// For a cancelled future, the cancellation is returned as an error value when
    /// `throw_if_cancelled` is false and raised as `Err` when it is true. Any
    /// other state fails with [`FutureError::IllegalState`].
    pub fn exception_now(&self, throw_if_cancelled: bool) -> Result<FutureError, FutureError> {
        match self.outcome() {
            Some(Outcome::Failed(error)) => Ok(error),
            Some(Outcome::Cancelled(code)) if throw_if_cancelled => {
                Err(FutureError::Cancelled(code))
            }
            Some(Outcome::Cancelled(code)) => Ok(FutureError::Cancelled(code)),
            _ => Err(FutureError::IllegalState("future has not failed")),
        }
    }

    /// Requests cancellation from the consumer side. Returns true if this call completed the future.
    pub fn cancel(&self, code: CancelCode) -> bool {
        code.is_cancelling() && self.complete(Outcome::Cancelled(code))
    }

    /// Registers a raw continuation, run inline on the completing thread.
    ///
    /// If the future is already done the continuation runs before this call returns.
    pub fn on_completion<F>(&self, f: F) -> Registration
    where
        F: FnOnce(Deferred<T>) + Send + 'static,
    {
        self.register(None, TaskOptions::NONE, Box::new(FnContinuation(f)))
    }

    /// Registers a raw continuation that runs on `executor`.
    pub fn on_completion_async<F>(
        &self,
        executor: Arc<dyn Executor>,
        options: TaskOptions,
        f: F,
    ) -> Registration
    where
        F: FnOnce(Deferred<T>) + Send + 'static,
    {
        self.register(Some(executor), options, Box::new(FnContinuation(f)))
    }

    pub(crate) fn register(
        &self,
        executor: Option<Arc<dyn Executor>>,
        options: TaskOptions,
        payload: Box<dyn Continuation<Deferred<T>>>,
    ) -> Registration {
        let node = Node::new(executor, options, payload);
        self.inner.chain.register(node, || self.clone())
    }

    /// Blocks the calling thread until the future completes and returns its result.
    ///
    /// Fails fast with [`FutureError::BlockingInEventLoop`] when called on the
    /// thread of the event loop this future is bound to.
    pub fn join(&self) -> Result<T, FutureError> {
        self.block(None)?;
        self.outcome()
            .ok_or(FutureError::IllegalState("future not completed after join"))?
            .into_result()
    }

    /// Blocks for at most `timeout`. Returns whether the future is done.
    pub fn await_timeout(&self, timeout: Duration) -> Result<bool, FutureError> {
        self.block(Some(Instant::now() + timeout))
    }

    fn block(&self, deadline: Option<Instant>) -> Result<bool, FutureError> {
        if self.is_done() {
            return Ok(true);
        }
        if self
            .inner
            .executor
            .as_ref()
            .is_some_and(|executor| executor.in_event_loop())
        {
            return Err(FutureError::BlockingInEventLoop);
        }

        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let notify = signal.clone();
        let registration = self.on_completion(move |_| {
            *notify.0.lock() = true;
            notify.1.notify_all();
        });

        let (lock, condvar) = &*signal;
        let mut done = lock.lock();
        while !*done {
            match deadline {
                None => condvar.wait(&mut done),
                Some(deadline) => {
                    if condvar.wait_until(&mut done, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        drop(done);

        registration.dispose();
        Ok(self.is_done())
    }
}

impl<T: FutureValue> IntoFuture for Deferred<T> {
    type Output = Result<T, FutureError>;
    type IntoFuture = Wait<T>;

    fn into_future(self) -> Wait<T> {
        Wait {
            deferred: self,
            waker: Arc::new(AtomicWaker::new()),
            registration: None,
        }
    }
}

/// Awaitable view of a [`Deferred`], created by `.await` or [`IntoFuture::into_future`].
pub struct Wait<T> {
    deferred: Deferred<T>,
    waker: Arc<AtomicWaker>,
    registration: Option<Registration>,
}

impl<T: FutureValue> Future for Wait<T> {
    type Output = Result<T, FutureError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(outcome) = this.deferred.outcome() {
            return Poll::Ready(outcome.into_result());
        }

        this.waker.register(cx.waker());

        if this.registration.is_none() {
            let waker = this.waker.clone();
            this.registration = Some(this.deferred.on_completion(move |_| waker.wake()));
        }

        // Completion may have raced with the waker registration above.
        match this.deferred.outcome() {
            Some(outcome) => Poll::Ready(outcome.into_result()),
            None => Poll::Pending,
        }
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.dispose();
        }
    }
}

impl<T: FutureValue> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish()
    }
}

impl<T: FutureValue> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish()
    }
}

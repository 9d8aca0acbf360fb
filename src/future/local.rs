//! Single-thread promise.
//!
//! [`LocalPromise`] has the same state machine and combinator contract as the
//! synchronized [`Promise`](super::Promise), but every transition and every chain
//! mutation must happen on one thread. The type is `!Send` and `!Sync`, so the
//! compiler enforces that precondition; nothing here is atomic.
//!
//! Continuations always run inline on the completing thread. Code that needs to
//! hop to an executor should use the synchronized promise.
//!
//! # Example
//! ```ignore
//! let promise = LocalPromise::new();
//! let doubled = promise.then_try_apply(|n: u32| n.checked_mul(2).ok_or("overflow".into()));
//! promise.try_set_result(21);
//! assert_eq!(doubled.result_now().unwrap(), 42);
//! ```

use super::state::{FutureState, Outcome};
use crate::cancel::CancelCode;
use crate::chain::local::{LocalChain, LocalNode, LocalRegistration};
use crate::error::{BoxError, FutureError};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Inner<T> {
    state: Cell<FutureState>,
    outcome: RefCell<Option<Outcome<T>>>,
    chain: LocalChain<LocalPromise<T>>,
}

/// A promise confined to the thread that created it.
///
/// The same handle is both the write side and the read side; clones share the
/// completion.
pub struct LocalPromise<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for LocalPromise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Default for LocalPromise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> LocalPromise<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                state: Cell::new(FutureState::Pending),
                outcome: RefCell::new(None),
                chain: LocalChain::new(),
            }),
        }
    }

    /// A promise already completed with `value`.
    pub fn succeeded(value: T) -> Self {
        let promise = Self::new();
        promise.try_set_result(value);
        promise
    }

    pub fn failed(error: FutureError) -> Self {
        let promise = Self::new();
        promise.try_set_exception(error);
        promise
    }

    pub fn state(&self) -> FutureState {
        self.inner.state.get()
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

    /// Moves `Pending` to `Computing`. Returns false from any other state.
    pub fn try_set_computing(&self) -> bool {
        if self.state() != FutureState::Pending {
            return false;
        }
        self.inner.state.set(FutureState::Computing);
        true
    }

    /// Completes with `value` and fires the chain. Returns false if already done.
    pub fn try_set_result(&self, value: T) -> bool {
        self.try_complete(Outcome::Success(value))
    }

    /// Completes as failed. Returns false if already done.
    pub fn try_set_exception(&self, error: FutureError) -> bool {
        self.try_complete(Outcome::Failed(error))
    }

    /// Completes as cancelled. Returns false if already done or `code` has no reason.
    pub fn try_set_cancelled(&self, code: CancelCode) -> bool {
        code.is_cancelling() && self.try_complete(Outcome::Cancelled(code))
    }

    /// Like [`LocalPromise::try_set_result`], but a second completion is
    /// reported as [`FutureError::AlreadyCompleted`].
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
        if self.is_done() {
            return false;
        }

        let state = outcome.state();
        *self.inner.outcome.borrow_mut() = Some(outcome);
        self.inner.state.set(state);
        self.inner.chain.fire_all(self.clone());
        true
    }

    fn complete_or_raise(&self, outcome: Outcome<T>) -> Result<(), FutureError> {
        if self.try_complete(outcome) {
            Ok(())
        } else {
            Err(FutureError::AlreadyCompleted)
        }
    }

    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.inner.outcome.borrow().clone()
    }

    pub fn result_now(&self) -> Result<T, FutureError> {
        match self.outcome() {
            Some(Outcome::Success(value)) => Ok(value),
            _ => Err(FutureError::IllegalState("future has not succeeded")),
        }
    }

    /// Same contract as [`Deferred::exception_now`](super::Deferred::exception_now).
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

    /// Registers a raw continuation. Runs before returning if already done.
    pub fn on_completion<F>(&self, f: F) -> LocalRegistration
    where
        F: FnOnce(LocalPromise<T>) + 'static,
    {
        self.inner
            .chain
            .register(LocalNode::new(f), || self.clone())
    }

    fn then<U, F>(&self, body: F) -> LocalPromise<U>
    where
        U: Clone + 'static,
        F: FnOnce(LocalPromise<T>, &LocalPromise<U>) + 'static,
    {
        let output = LocalPromise::new();
        let downstream = output.clone();

        let _ = self.on_completion(move |input| {
            if output.is_done() {
                return;
            }
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body(input, &output))) {
                output.try_set_exception(FutureError::from_panic(payload));
            }
        });

        downstream
    }

    fn forward_failure<U: Clone + 'static>(&self, output: &LocalPromise<U>) -> Option<T> {
        match self.outcome().map(Outcome::into_value) {
            Some(Ok(value)) => Some(value),
            Some(Err(forwarded)) => {
                output.try_complete(forwarded);
                None
            }
            None => {
                output.try_set_exception(FutureError::IllegalState("source future not completed"));
                None
            }
        }
    }

    pub fn then_apply<U, F>(&self, f: F) -> LocalPromise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then(move |input, output: &LocalPromise<U>| {
            if let Some(value) = input.forward_failure(output) {
                output.try_set_result(f(value));
            }
        })
    }

    /// Maps the value with a function that may fail.
    ///
    /// An `Err` fails downstream; a boxed [`FutureError::Cancelled`] cancels it.
    pub fn then_try_apply<U, F>(&self, f: F) -> LocalPromise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, BoxError> + 'static,
    {
        self.then(move |input, output: &LocalPromise<U>| {
            if let Some(value) = input.forward_failure(output) {
                output.try_complete(Outcome::from_user(f(value)));
            }
        })
    }

    pub fn then_accept<F>(&self, f: F) -> LocalPromise<()>
    where
        F: FnOnce(T) + 'static,
    {
        self.then_apply(f)
    }

    pub fn then_run<F>(&self, f: F) -> LocalPromise<()>
    where
        F: FnOnce() + 'static,
    {
        self.then_apply(move |_| f())
    }

    pub fn then_call<U, F>(&self, f: F) -> LocalPromise<U>
    where
        U: Clone + 'static,
        F: FnOnce() -> U + 'static,
    {
        self.then_apply(move |_| f())
    }

    pub fn then_compose<U, F>(&self, f: F) -> LocalPromise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> LocalPromise<U> + 'static,
    {
        self.then(move |input, output: &LocalPromise<U>| {
            if let Some(value) = input.forward_failure(output) {
                let relay = output.clone();
                let _ = f(value).on_completion(move |inner| {
                    if let Some(outcome) = inner.outcome() {
                        relay.try_complete(outcome);
                    }
                });
            }
        })
    }

    pub fn compose_call<U, F>(&self, f: F) -> LocalPromise<U>
    where
        U: Clone + 'static,
        F: FnOnce() -> LocalPromise<U> + 'static,
    {
        self.then_compose(move |_| f())
    }

    pub fn then_try_compose<U, F>(&self, f: F) -> LocalPromise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<LocalPromise<U>, BoxError> + 'static,
    {
        self.then(move |input, output: &LocalPromise<U>| {
            let Some(value) = input.forward_failure(output) else {
                return;
            };

            match f(value) {
                Ok(inner) => {
                    let relay = output.clone();
                    let _ = inner.on_completion(move |inner| {
                        if let Some(outcome) = inner.outcome() {
                            relay.try_complete(outcome);
                        }
                    });
                }
                Err(error) => {
                    output.try_complete(Outcome::from_user(Err(error)));
                }
            }
        })
    }

    /// Recovers from a failure; cancellation passes through.
    pub fn catching<F>(&self, f: F) -> LocalPromise<T>
    where
        F: FnOnce(FutureError) -> T + 'static,
    {
        self.then(move |input, output: &LocalPromise<T>| match input.outcome() {
            Some(Outcome::Failed(error)) => {
                output.try_set_result(f(error));
            }
            Some(outcome) => {
                output.try_complete(outcome);
            }
            None => {
                output.try_set_exception(FutureError::IllegalState("source future not completed"));
            }
        })
    }

    /// Recovers from a failure with a function that may fail again.
    pub fn try_catching<F>(&self, f: F) -> LocalPromise<T>
    where
        F: FnOnce(FutureError) -> Result<T, BoxError> + 'static,
    {
        self.then(move |input, output: &LocalPromise<T>| match input.outcome() {
            Some(Outcome::Failed(error)) => {
                output.try_complete(Outcome::from_user(f(error)));
            }
            Some(outcome) => {
                output.try_complete(outcome);
            }
            None => {
                output.try_set_exception(FutureError::IllegalState("source future not completed"));
            }
        })
    }

    /// Maps either outcome; cancellation is reported as [`FutureError::Cancelled`].
    pub fn handle<U, F>(&self, f: F) -> LocalPromise<U>
    where
        U: Clone + 'static,
        F: FnOnce(Result<T, FutureError>) -> U + 'static,
    {
        self.then(move |input, output: &LocalPromise<U>| {
            let result = input
                .outcome()
                .ok_or(FutureError::IllegalState("source future not completed"))
                .and_then(Outcome::into_result);
            output.try_set_result(f(result));
        })
    }

    pub fn try_handle<U, F>(&self, f: F) -> LocalPromise<U>
    where
        U: Clone + 'static,
        F: FnOnce(Result<T, FutureError>) -> Result<U, BoxError> + 'static,
    {
        self.then(move |input, output: &LocalPromise<U>| {
            let result = input
                .outcome()
                .ok_or(FutureError::IllegalState("source future not completed"))
                .and_then(Outcome::into_result);
            output.try_complete(Outcome::from_user(f(result)));
        })
    }

    pub fn when_complete<F>(&self, f: F) -> LocalPromise<T>
    where
        F: FnOnce(&Outcome<T>) + 'static,
    {
        self.then(move |input, output: &LocalPromise<T>| {
            let Some(outcome) = input.outcome() else {
                output.try_set_exception(FutureError::IllegalState("source future not completed"));
                return;
            };

            match catch_unwind(AssertUnwindSafe(|| f(&outcome))) {
                Err(payload) if outcome.is_success() => {
                    output.try_set_exception(FutureError::from_panic(payload));
                }
                _ => {
                    output.try_complete(outcome);
                }
            }
        })
    }
}

impl<T: Clone + 'static> IntoFuture for LocalPromise<T> {
    type Output = Result<T, FutureError>;
    type IntoFuture = LocalWait<T>;

    fn into_future(self) -> LocalWait<T> {
        LocalWait {
            promise: self,
            waker: Rc::new(RefCell::new(None)),
            registration: None,
        }
    }
}

/// Awaitable view of a [`LocalPromise`].
pub struct LocalWait<T> {
    promise: LocalPromise<T>,
    waker: Rc<RefCell<Option<Waker>>>,
    registration: Option<LocalRegistration>,
}

impl<T: Clone + 'static> Future for LocalWait<T> {
    type Output = Result<T, FutureError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(outcome) = this.promise.outcome() {
            return Poll::Ready(outcome.into_result());
        }

        *this.waker.borrow_mut() = Some(cx.waker().clone());

        if this.registration.is_none() {
            let waker = this.waker.clone();
            this.registration = Some(this.promise.on_completion(move |_| {
                if let Some(waker) = waker.borrow_mut().take() {
                    waker.wake();
                }
            }));
        }

        Poll::Pending
    }
}

impl<T> Drop for LocalWait<T> {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.dispose();
        }
    }
}

impl<T: Clone + 'static> fmt::Debug for LocalPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPromise")
            .field("state", &self.state())
            .finish()
    }
}

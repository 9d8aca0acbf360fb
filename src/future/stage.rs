//! Combinators that derive a new future from a completed one.
//!
//! Every combinator registers one continuation on its source and returns the
//! read side of a fresh downstream promise. By default a failed or cancelled
//! source skips the user function and forwards its outcome unchanged, so a
//! cancellation stays a cancellation all the way down the chain. Only
//! [`Stage::catching`], [`Stage::handle`] and [`Stage::when_complete`] observe
//! failures.
//!
//! A panic in a user function fails the downstream future with
//! [`FutureError::Panicked`]; the source is unaffected.
//!
//! The `try` variants take functions returning `Result<_, BoxError>`. An `Err`
//! fails the downstream future, except that a boxed [`FutureError`] is kept as
//! is: returning `Err(FutureError::Cancelled(code).into())` cancels downstream.
//!
//! ```ignore
//! let promise = Promise::new();
//! let length = promise.then_apply(|s: String| s.len()).then_apply(|n| n * 2);
//! promise.try_set_result("abc".to_owned());
//! assert_eq!(length.result_now().unwrap(), 6);
//! ```

use super::FutureValue;
use super::promise::{Deferred, Promise};
use super::state::Outcome;
use crate::chain::sync::Continuation;
use crate::error::{BoxError, FutureError};
use crate::runtime::executor::{Executor, TaskOptions};

use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Where and how the continuations of a [`Stage`] run.
///
/// Obtained from [`Deferred::on`] for executor-bound continuations; the
/// combinator methods directly on [`Deferred`] run inline on the completing thread.
pub struct Stage<'a, T> {
    source: &'a Deferred<T>,
    executor: Option<Arc<dyn Executor>>,
    options: TaskOptions,
}

struct StageNode<T, U, F> {
    body: F,
    output: Promise<U>,
    _input: PhantomData<fn(Deferred<T>)>,
}

impl<T, U, F> Continuation<Deferred<T>> for StageNode<T, U, F>
where
    T: FutureValue,
    U: FutureValue,
    F: FnOnce(Deferred<T>, &Promise<U>) + Send + 'static,
{
    fn run(self: Box<Self>, input: Deferred<T>) {
        let StageNode { body, output, .. } = *self;

        // The consumer may have cancelled the downstream future already.
        if output.is_done() {
            return;
        }

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body(input, &output))) {
            output.try_set_exception(FutureError::from_panic(payload));
        }
    }

    fn reject(self: Box<Self>, _input: Deferred<T>, error: FutureError) {
        self.output.try_set_exception(error);
    }
}

/// Returns the source value, or forwards its failure or cancellation to `output`.
fn forward_failure<T: FutureValue, U: FutureValue>(
    input: &Deferred<T>,
    output: &Promise<U>,
) -> Option<T> {
    match input.outcome() {
        Some(outcome) => match outcome.into_value() {
            Ok(value) => Some(value),
            Err(forwarded) => {
                output.try_complete(forwarded);
                None
            }
        },
        None => {
            output.try_set_exception(FutureError::IllegalState("source future not completed"));
            None
        }
    }
}

impl<'a, T: FutureValue> Stage<'a, T> {
    fn new(
        source: &'a Deferred<T>,
        executor: Option<Arc<dyn Executor>>,
        options: TaskOptions,
    ) -> Self {
        Self {
            source,
            executor,
            options,
        }
    }

    fn then<U, F>(self, body: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(Deferred<T>, &Promise<U>) + Send + 'static,
    {
        let binding = self
            .executor
            .clone()
            .or_else(|| self.source.executor().cloned());
        let output = Promise::bound_to(binding);
        let downstream = output.deferred();

        let node = StageNode {
            body,
            output,
            _input: PhantomData,
        };
        // The downstream future is the handle; the registration is never disposed.
        let _ = self
            .source
            .register(self.executor, self.options, Box::new(node));

        downstream
    }

    /// Maps the value.
    pub fn then_apply<U, F>(self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |input, output: &Promise<U>| {
            if let Some(value) = forward_failure(&input, output) {
                output.try_set_result(f(value));
            }
        })
    }

    /// Consumes the value.
    pub fn then_accept<F>(self, f: F) -> Deferred<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.then_apply(f)
    }

    /// Maps the value with a function that may fail.
    pub fn then_try_apply<U, F>(self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(T) -> Result<U, BoxError> + Send + 'static,
    {
        self.then(move |input, output: &Promise<U>| {
            if let Some(value) = forward_failure(&input, output) {
                output.try_complete(Outcome::from_user(f(value)));
            }
        })
    }

    /// Runs `f` after the source succeeds, ignoring its value.
    pub fn then_run<F>(self, f: F) -> Deferred<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_apply(move |_| f())
    }

    /// Produces a new value after the source succeeds, ignoring its value.
    pub fn then_call<U, F>(self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce() -> U + Send + 'static,
    {
        self.then_apply(move |_| f())
    }

    /// Chains a future produced from the value; the result follows that future.
    pub fn then_compose<U, F>(self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        self.then(move |input, output: &Promise<U>| {
            if let Some(value) = forward_failure(&input, output) {
                let relay = output.clone();
                let _ = f(value).on_completion(move |inner| {
                    relay.try_transfer_from(&inner);
                });
            }
        })
    }

    /// Chains a future produced without looking at the value.
    pub fn compose_call<U, F>(self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce() -> Deferred<U> + Send + 'static,
    {
        self.then_compose(move |_| f())
    }

    /// Like [`Stage::then_compose`], but producing the inner future may fail.
    pub fn then_try_compose<U, F>(self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(T) -> Result<Deferred<U>, BoxError> + Send + 'static,
    {
        self.then(move |input, output: &Promise<U>| {
            let Some(value) = forward_failure(&input, output) else {
                return;
            };

            match f(value) {
                Ok(inner) => {
                    let relay = output.clone();
                    let _ = inner.on_completion(move |inner| {
                        relay.try_transfer_from(&inner);
                    });
                }
                Err(error) => {
                    output.try_complete(Outcome::from_user(Err(error)));
                }
            }
        })
    }

    /// Recovers from a failure. Values and cancellations pass through untouched.
    pub fn catching<F>(self, f: F) -> Deferred<T>
    where
        F: FnOnce(FutureError) -> T + Send + 'static,
    {
        self.then(move |input, output: &Promise<T>| match input.outcome() {
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
    ///
    /// Returning the original error (boxed) keeps downstream failed with it.
    pub fn try_catching<F>(self, f: F) -> Deferred<T>
    where
        F: FnOnce(FutureError) -> Result<T, BoxError> + Send + 'static,
    {
        self.then(move |input, output: &Promise<T>| match input.outcome() {
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
    pub fn handle<U, F>(self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(Result<T, FutureError>) -> U + Send + 'static,
    {
        self.then(move |input, output: &Promise<U>| {
            let result = input
                .outcome()
                .ok_or(FutureError::IllegalState("source future not completed"))
                .and_then(Outcome::into_result);
            output.try_set_result(f(result));
        })
    }

    /// Maps either outcome with a function that may fail.
    pub fn try_handle<U, F>(self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(Result<T, FutureError>) -> Result<U, BoxError> + Send + 'static,
    {
        self.then(move |input, output: &Promise<U>| {
            let result = input
                .outcome()
                .ok_or(FutureError::IllegalState("source future not completed"))
                .and_then(Outcome::into_result);
            output.try_complete(Outcome::from_user(f(result)));
        })
    }

    /// Observes the outcome, then completes downstream with the same outcome.
    ///
    /// If `f` panics after a successful source, downstream fails with the panic;
    /// a failed or cancelled source keeps its own outcome.
    pub fn when_complete<F>(self, f: F) -> Deferred<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.then(move |input, output: &Promise<T>| {
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

impl<T: FutureValue> Deferred<T> {
    /// Continuations registered through the returned stage run on `executor`.
    ///
    /// With [`TaskOptions::STAGE_TRY_INLINE`] they run inline when the source
    /// completes on the executor's own thread.
    pub fn on(&self, executor: Arc<dyn Executor>, options: TaskOptions) -> Stage<'_, T> {
        Stage::new(self, Some(executor), options)
    }

    fn inline(&self) -> Stage<'_, T> {
        Stage::new(self, None, TaskOptions::NONE)
    }

    /// See [`Stage::then_apply`].
    pub fn then_apply<U, F>(&self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.inline().then_apply(f)
    }

    /// See [`Stage::then_accept`].
    pub fn then_accept<F>(&self, f: F) -> Deferred<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.inline().then_accept(f)
    }

    /// See [`Stage::then_try_apply`].
    pub fn then_try_apply<U, F>(&self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(T) -> Result<U, BoxError> + Send + 'static,
    {
        self.inline().then_try_apply(f)
    }

    /// See [`Stage::then_run`].
    pub fn then_run<F>(&self, f: F) -> Deferred<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inline().then_run(f)
    }

    /// See [`Stage::then_call`].
    pub fn then_call<U, F>(&self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce() -> U + Send + 'static,
    {
        self.inline().then_call(f)
    }

    /// See [`Stage::then_compose`].
    pub fn then_compose<U, F>(&self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        self.inline().then_compose(f)
    }

    /// See [`Stage::compose_call`].
    pub fn compose_call<U, F>(&self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce() -> Deferred<U> + Send + 'static,
    {
        self.inline().compose_call(f)
    }

    /// See [`Stage::then_try_compose`].
    pub fn then_try_compose<U, F>(&self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(T) -> Result<Deferred<U>, BoxError> + Send + 'static,
    {
        self.inline().then_try_compose(f)
    }

    /// See [`Stage::catching`].
    pub fn catching<F>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(FutureError) -> T + Send + 'static,
    {
        self.inline().catching(f)
    }

    /// See [`Stage::handle`].
    pub fn handle<U, F>(&self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(Result<T, FutureError>) -> U + Send + 'static,
    {
        self.inline().handle(f)
    }

    /// See [`Stage::try_catching`].
    pub fn try_catching<F>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(FutureError) -> Result<T, BoxError> + Send + 'static,
    {
        self.inline().try_catching(f)
    }

    /// See [`Stage::try_handle`].
    pub fn try_handle<U, F>(&self, f: F) -> Deferred<U>
    where
        U: FutureValue,
        F: FnOnce(Result<T, FutureError>) -> Result<U, BoxError> + Send + 'static,
    {
        self.inline().try_handle(f)
    }

    /// See [`Stage::when_complete`].
    pub fn when_complete<F>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.inline().when_complete(f)
    }
}

//! Aggregation of several futures into one.
//!
//! Every input gets one counting listener. A listener first records success,
//! then completion, so `succeeded_count` is never behind `done_count` for the
//! same input. Readers load `done_count` before `succeeded_count` and can only
//! over-estimate successes, never report a failure that is not certain yet.

use super::FutureValue;
use super::promise::{Deferred, Promise};
use super::state::Outcome;
use crate::error::{CombineError, FutureError};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

enum Rule<T> {
    AnyOf(Promise<T>),
    SelectN {
        require: usize,
        fail_fast: bool,
        promise: Promise<()>,
    },
}

struct Counters<T> {
    future_count: AtomicUsize,
    done_count: AtomicUsize,
    succeeded_count: AtomicUsize,
    first: OnceLock<Outcome<T>>,
    rule: OnceLock<Rule<T>>,
}

impl<T: FutureValue> Counters<T> {
    fn on_input_done(&self, input: &Deferred<T>) {
        if let Some(outcome) = input.outcome() {
            if outcome.is_success() {
                self.succeeded_count.fetch_add(1, Ordering::AcqRel);
            }
            let _ = self.first.set(outcome);
        }
        self.done_count.fetch_add(1, Ordering::AcqRel);

        self.evaluate();
    }

    /// Resolves the aggregate if the installed rule allows it. Idempotent.
    fn evaluate(&self) {
        let Some(rule) = self.rule.get() else {
            return;
        };

        match rule {
            Rule::AnyOf(promise) => {
                if let Some(outcome) = self.first.get() {
                    promise.try_complete(outcome.clone());
                }
            }
            Rule::SelectN {
                require,
                fail_fast,
                promise,
            } => {
                let total = self.future_count.load(Ordering::Acquire);
                let done = self.done_count.load(Ordering::Acquire);
                let succeeded = self.succeeded_count.load(Ordering::Acquire);

                if !fail_fast && done < total {
                    return;
                }

                if succeeded >= *require {
                    promise.try_set_result(());
                } else if succeeded + (total - done) < *require {
                    promise.try_set_exception(FutureError::failed(CombineError {
                        succeeded,
                        required: *require,
                    }));
                }
            }
        }
    }
}

/// Combines several futures into one aggregate future.
///
/// ```ignore
/// let mut combiner = FutureCombiner::new();
/// combiner.add(&a).add(&b).add(&c);
/// let two_of_three = combiner.select_n(2, true);
/// ```
pub struct FutureCombiner<T> {
    counters: Arc<Counters<T>>,
}

impl<T: FutureValue> Default for FutureCombiner<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FutureValue> FutureCombiner<T> {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters {
                future_count: AtomicUsize::new(0),
                done_count: AtomicUsize::new(0),
                succeeded_count: AtomicUsize::new(0),
                first: OnceLock::new(),
                rule: OnceLock::new(),
            }),
        }
    }

    /// Adds an input. Inputs that are already done are counted immediately.
    pub fn add(&mut self, future: &Deferred<T>) -> &mut Self {
        self.counters.future_count.fetch_add(1, Ordering::AcqRel);

        let counters = self.counters.clone();
        let _ = future.on_completion(move |input| counters.on_input_done(&input));
        self
    }

    pub fn add_all<'a>(&mut self, futures: impl IntoIterator<Item = &'a Deferred<T>>) -> &mut Self {
        for future in futures {
            self.add(future);
        }
        self
    }

    pub fn future_count(&self) -> usize {
        self.counters.future_count.load(Ordering::Acquire)
    }

    pub fn done_count(&self) -> usize {
        self.counters.done_count.load(Ordering::Acquire)
    }

    pub fn succeeded_count(&self) -> usize {
        self.counters.succeeded_count.load(Ordering::Acquire)
    }

    /// Completes with the outcome of whichever input finishes first.
    ///
    /// An empty combiner fails with [`FutureError::IllegalState`], since there is
    /// no outcome to forward.
    pub fn any_of(self) -> Deferred<T> {
        if self.future_count() == 0 {
            return Deferred::failed(FutureError::IllegalState("any_of on an empty combiner"));
        }

        let promise = Promise::new();
        let deferred = promise.deferred();
        self.install(Rule::AnyOf(promise));
        deferred
    }

    /// Succeeds once `require` inputs have succeeded.
    ///
    /// With `fail_fast` the aggregate resolves as soon as the answer is certain:
    /// success at `require` successes, failure as soon as too few inputs remain
    /// to reach it. Without it the aggregate waits for every input. Failure is a
    /// [`FutureError::Failed`] wrapping a [`CombineError`].
    pub fn select_n(self, require: usize, fail_fast: bool) -> Deferred<()> {
        if require == 0 {
            return Deferred::succeeded(());
        }

        let promise = Promise::new();
        let deferred = promise.deferred();
        self.install(Rule::SelectN {
            require,
            fail_fast,
            promise,
        });
        deferred
    }

    /// Succeeds when every input succeeds.
    pub fn select_all(self, fail_fast: bool) -> Deferred<()> {
        let require = self.future_count();
        self.select_n(require, fail_fast)
    }

    fn install(self, rule: Rule<T>) {
        if self.counters.rule.set(rule).is_err() {
            return;
        }
        // Inputs that finished before the rule existed are accounted for here.
        self.counters.evaluate();
    }
}

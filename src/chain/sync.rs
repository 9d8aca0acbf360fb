//! Completion chain for completables that may be completed from any thread.

use super::{ChainState, Claim, Detach, Registration, Stack};
use crate::error::FutureError;
use crate::runtime::executor::{Executor, Runnable, TaskOptions};
use crate::utils::run_logged;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// The callback payload of a node. `A` is the completed owner handed to it.
pub(crate) trait Continuation<A>: Send + 'static {
    fn run(self: Box<Self>, arg: A);

    /// Called instead of `run` when the node's executor refuses the job.
    fn reject(self: Box<Self>, arg: A, error: FutureError) {
        drop(arg);
        tracing::warn!(%error, "continuation rejected by its executor");
    }
}

/// Adapts a closure into a [`Continuation`].
pub(crate) struct FnContinuation<F>(pub(crate) F);

impl<A, F> Continuation<A> for FnContinuation<F>
where
    F: FnOnce(A) + Send + 'static,
{
    fn run(self: Box<Self>, arg: A) {
        (self.0)(arg)
    }
}

pub(crate) struct Node<A> {
    claim: AtomicU8,
    executor: Option<Arc<dyn Executor>>,
    options: TaskOptions,
    payload: Mutex<Option<Box<dyn Continuation<A>>>>,
}

impl<A: Send + 'static> Node<A> {
    pub(crate) fn new(
        executor: Option<Arc<dyn Executor>>,
        options: TaskOptions,
        payload: Box<dyn Continuation<A>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            claim: AtomicU8::new(Claim::Unclaimed as u8),
            executor,
            options,
            payload: Mutex::new(Some(payload)),
        })
    }

    fn try_claim(&self, claim: Claim) -> bool {
        self.claim
            .compare_exchange(
                Claim::Unclaimed as u8,
                claim as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Runs the node inline or hands it to its executor, if the fire claim is won.
    pub(crate) fn fire(&self, arg: A) {
        if !self.try_claim(Claim::Fired) {
            return;
        }

        let Some(payload) = self.payload.lock().take() else {
            return;
        };

        match &self.executor {
            Some(executor)
                if !(self.options.contains(TaskOptions::STAGE_TRY_INLINE)
                    && executor.in_event_loop()) =>
            {
                executor.execute(Box::new(FireJob { payload, arg }), self.options);
            }
            _ => run_logged("completion", move || payload.run(arg)),
        }
    }
}

struct FireJob<A> {
    payload: Box<dyn Continuation<A>>,
    arg: A,
}

impl<A: Send + 'static> Runnable for FireJob<A> {
    fn run(self: Box<Self>) {
        let FireJob { payload, arg } = *self;
        run_logged("completion", move || payload.run(arg));
    }

    fn reject(self: Box<Self>, error: FutureError) {
        let FireJob { payload, arg } = *self;
        run_logged("completion", move || payload.reject(arg, error));
    }
}

type SharedState<A> = Arc<Mutex<ChainState<Arc<Node<A>>>>>;

/// Multi-producer completion chain.
///
/// Pushes may race with [`SyncChain::fire_all`]; the head lock only guards the
/// swap, never a callback.
pub(crate) struct SyncChain<A> {
    state: SharedState<A>,
}

impl<A: Clone + Send + 'static> SyncChain<A> {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState::Open(Stack::new()))),
        }
    }

    /// Links the node. Returns false without linking once the chain is closed.
    pub(crate) fn push(&self, node: &Arc<Node<A>>) -> bool {
        match &mut *self.state.lock() {
            ChainState::Open(stack) => {
                stack.push(node.clone());
                true
            }
            ChainState::Closed => false,
        }
    }

    /// Links the node, or fires it right away with `arg` if the chain is closed.
    pub(crate) fn register(&self, node: Arc<Node<A>>, arg: impl FnOnce() -> A) -> Registration {
        if self.push(&node) {
            Registration::new(SyncDetach {
                state: Arc::downgrade(&self.state),
                node,
            })
        } else {
            node.fire(arg());
            Registration::fired()
        }
    }

    /// Closes the chain and fires every linked node in registration order.
    ///
    /// Only the first call fires anything.
    pub(crate) fn fire_all(&self, arg: A) {
        let stack = self.state.lock().close();
        let Some(stack) = stack else {
            return;
        };

        for node in stack.into_fifo() {
            node.fire(arg.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        matches!(&*self.state.lock(), ChainState::Closed)
    }

    #[cfg(test)]
    pub(crate) fn has_listeners(&self) -> bool {
        match &*self.state.lock() {
            ChainState::Open(stack) => !stack.is_empty(),
            ChainState::Closed => false,
        }
    }
}

struct SyncDetach<A> {
    state: Weak<Mutex<ChainState<Arc<Node<A>>>>>,
    node: Arc<Node<A>>,
}

impl<A: Send + 'static> Detach for SyncDetach<A> {
    fn detach(&self) -> bool {
        if !self.node.try_claim(Claim::Disposed) {
            return false;
        }

        if let Some(state) = self.state.upgrade()
            && let ChainState::Open(stack) = &mut *state.lock()
        {
            stack.remove_where(|node| Arc::ptr_eq(node, &self.node));
        }

        let payload = self.node.payload.lock().take();
        drop(payload);
        true
    }
}

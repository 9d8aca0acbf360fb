//! Completion chain for completables confined to one thread.
//!
//! Same algorithm as [`super::sync`], with the claim reduced to a plain flag
//! check. Callers must never share the owner across threads; the `Rc`-based
//! types enforce this at compile time.

use super::{ChainState, Claim, Stack};
use crate::utils::run_logged;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Payload<A> = Box<dyn FnOnce(A)>;

pub(crate) struct LocalNode<A> {
    claim: Cell<Claim>,
    payload: RefCell<Option<Payload<A>>>,
}

impl<A> LocalNode<A> {
    pub(crate) fn new(payload: impl FnOnce(A) + 'static) -> Rc<Self> {
        Rc::new(Self {
            claim: Cell::new(Claim::Unclaimed),
            payload: RefCell::new(Some(Box::new(payload))),
        })
    }

    fn try_claim(&self, claim: Claim) -> bool {
        if self.claim.get() != Claim::Unclaimed {
            return false;
        }
        self.claim.set(claim);
        true
    }

    fn fire(&self, arg: A) {
        if !self.try_claim(Claim::Fired) {
            return;
        }

        let payload = self.payload.borrow_mut().take();
        if let Some(payload) = payload {
            run_logged("local completion", move || payload(arg));
        }
    }
}

type LocalState<A> = Rc<RefCell<ChainState<Rc<LocalNode<A>>>>>;

/// Single-thread completion chain.
pub(crate) struct LocalChain<A> {
    state: LocalState<A>,
}

impl<A: Clone + 'static> LocalChain<A> {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ChainState::Open(Stack::new()))),
        }
    }

    /// Links the node, or fires it right away with `arg` if the chain is closed.
    pub(crate) fn register(
        &self,
        node: Rc<LocalNode<A>>,
        arg: impl FnOnce() -> A,
    ) -> LocalRegistration {
        let linked = match &mut *self.state.borrow_mut() {
            ChainState::Open(stack) => {
                stack.push(node.clone());
                true
            }
            ChainState::Closed => false,
        };

        if linked {
            LocalRegistration {
                handle: Some(Box::new(LocalDetach {
                    state: Rc::downgrade(&self.state),
                    node,
                })),
            }
        } else {
            node.fire(arg());
            LocalRegistration { handle: None }
        }
    }

    /// Closes the chain and fires every linked node in registration order.
    pub(crate) fn fire_all(&self, arg: A) {
        let stack = self.state.borrow_mut().close();
        let Some(stack) = stack else {
            return;
        };

        for node in stack.into_fifo() {
            node.fire(arg.clone());
        }
    }
}

trait LocalDetachable {
    fn detach(&self) -> bool;
}

struct LocalDetach<A> {
    state: Weak<RefCell<ChainState<Rc<LocalNode<A>>>>>,
    node: Rc<LocalNode<A>>,
}

impl<A> LocalDetachable for LocalDetach<A> {
    fn detach(&self) -> bool {
        if !self.node.try_claim(Claim::Disposed) {
            return false;
        }

        if let Some(state) = self.state.upgrade()
            && let ChainState::Open(stack) = &mut *state.borrow_mut()
        {
            stack.remove_where(|node| Rc::ptr_eq(node, &self.node));
        }

        let payload = self.node.payload.borrow_mut().take();
        drop(payload);
        true
    }
}

/// Handle to a continuation registered on a [`LocalPromise`](crate::LocalPromise).
pub struct LocalRegistration {
    handle: Option<Box<dyn LocalDetachable>>,
}

impl LocalRegistration {
    /// Removes the continuation if it has not fired yet. Returns true if it was removed.
    pub fn dispose(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| handle.detach())
    }
}

impl fmt::Debug for LocalRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRegistration")
            .field("linked", &self.handle.is_some())
            .finish()
    }
}

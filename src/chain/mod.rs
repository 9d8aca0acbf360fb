//! Completion chains: the pending continuations of a completable.
//!
//! A chain is a singly-linked stack owned by its completable (a promise or a
//! cancellation token). Registration pushes onto the head; completion swaps the
//! whole stack for a closed marker, reverses it back into registration order
//! and fires every node exactly once.
//!
//! Each node carries a one-time claim. Firing and disposal both try to take the
//! claim and only the winner acts on the node, so a continuation is either run
//! once or removed, never both. The multi-producer chain ([`sync`]) takes the
//! claim with a compare-and-swap; the single-thread chain ([`local`]) uses a
//! plain cell because no race is possible there.

pub(crate) mod local;
pub(crate) mod sync;

use std::fmt;

pub(crate) trait Detach: Send + Sync {
    fn detach(&self) -> bool;
}

/// Handle to a registered continuation or listener.
///
/// Dropping the handle leaves the registration in place; call
/// [`Registration::dispose`] to remove it before it fires.
pub struct Registration {
    handle: Option<Box<dyn Detach>>,
}

impl Registration {
    pub(crate) fn new(handle: impl Detach + 'static) -> Self {
        Self {
            handle: Some(Box::new(handle)),
        }
    }

    /// A registration with nothing linked: it fired on creation or can never fire.
    pub(crate) fn fired() -> Self {
        Self { handle: None }
    }

    /// Removes the registration if it has not fired yet.
    ///
    /// Returns true when this call won the claim, which guarantees the
    /// continuation will never run. Returns false if it already fired, is
    /// firing on another thread, or was disposed before.
    pub fn dispose(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| handle.detach())
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("linked", &self.handle.is_some())
            .finish()
    }
}

/// Ownership claim of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Claim {
    Unclaimed = 0,
    Fired = 1,
    Disposed = 2,
}

struct Link<N> {
    node: N,
    next: Option<Box<Link<N>>>,
}

/// LIFO stack of nodes, head first.
pub(crate) struct Stack<N> {
    head: Option<Box<Link<N>>>,
}

impl<N> Stack<N> {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn push(&mut self, node: N) {
        let next = self.head.take();
        self.head = Some(Box::new(Link { node, next }));
    }

    /// Unlinks the first node matching `pred`, scanning from the head.
    pub(crate) fn remove_where(&mut self, pred: impl Fn(&N) -> bool) -> Option<N> {
        let mut cursor = &mut self.head;

        while cursor.as_ref().is_some_and(|link| !pred(&link.node)) {
            cursor = &mut cursor.as_mut()?.next;
        }

        let mut removed = cursor.take()?;
        *cursor = removed.next.take();

        Some(removed.node)
    }

    /// Consumes the stack, returning nodes in registration (FIFO) order.
    pub(crate) fn into_fifo(mut self) -> Vec<N> {
        let mut nodes = Vec::new();
        let mut cursor = self.head.take();

        while let Some(mut link) = cursor {
            cursor = link.next.take();
            nodes.push(link.node);
        }

        nodes.reverse();
        nodes
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl<N> Drop for Stack<N> {
    // Iterative so that long chains cannot overflow the stack on drop.
    fn drop(&mut self) {
        let mut cursor = self.head.take();
        while let Some(mut link) = cursor {
            cursor = link.next.take();
        }
    }
}

/// The head slot of a chain: open for registration, or closed once fired.
pub(crate) enum ChainState<N> {
    Open(Stack<N>),
    Closed,
}

impl<N> ChainState<N> {
    /// Swaps the stack for the closed marker. Returns `None` if already closed.
    pub(crate) fn close(&mut self) -> Option<Stack<N>> {
        match std::mem::replace(self, ChainState::Closed) {
            ChainState::Open(stack) => Some(stack),
            ChainState::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_fires_in_registration_order() {
        let mut stack = Stack::new();
        for i in 0..5 {
            stack.push(i);
        }
        assert_eq!(stack.into_fifo(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_stack_remove_head_middle_and_tail() {
        let mut stack = Stack::new();
        for i in 0..5 {
            stack.push(i);
        }
        assert_eq!(stack.remove_where(|n| *n == 4), Some(4), "head removal");
        assert_eq!(stack.remove_where(|n| *n == 2), Some(2), "middle removal");
        assert_eq!(stack.remove_where(|n| *n == 0), Some(0), "tail removal");
        assert_eq!(stack.remove_where(|n| *n == 9), None, "missing node");
        assert_eq!(stack.into_fifo(), vec![1, 3]);
    }

    #[test]
    fn test_close_only_once() {
        let mut state = ChainState::Open(Stack::<u8>::new());
        assert!(state.close().is_some());
        assert!(state.close().is_none());
    }
}

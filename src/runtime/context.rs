//! Thread-local event-loop context.
//!
//! While a loop runs a tick, its task heap is published in thread-local storage.
//! Code running inside that tick (jobs, tasks, inline continuations) can then
//! schedule and unschedule tasks directly instead of going through the queue,
//! which is what lets a zero-delay task scheduled by immediate work fire in the
//! same tick.
//!
//! The context is set by [`enter_context`] and the previous value is restored
//! on exit, so nested loops on one thread see their own core.

use crate::runtime::core::Core;

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone)]
pub(crate) struct LoopContext {
    pub(crate) id: u64,
    pub(crate) core: Rc<RefCell<Core>>,
}

thread_local! {
    /// The loop currently ticking on this thread, if any.
    static CURRENT_LOOP: RefCell<Option<LoopContext>> = const { RefCell::new(None) };
}

/// Runs `function` with `context` installed as the current loop.
pub(crate) fn enter_context<F, R>(context: LoopContext, function: F) -> R
where
    F: FnOnce() -> R,
{
    struct Restore(Option<LoopContext>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            CURRENT_LOOP.with(|current| *current.borrow_mut() = previous);
        }
    }

    let previous = CURRENT_LOOP.with(|current| current.borrow_mut().replace(context));
    let _restore = Restore(previous);

    function()
}

/// Runs `function` on the core of loop `id` if this thread is inside one of its ticks.
///
/// Returns `None` when called from another thread, outside a tick, or while the
/// core is already borrowed further up the stack.
pub(crate) fn with_current_core<F, R>(id: u64, function: F) -> Option<R>
where
    F: FnOnce(&mut Core) -> R,
{
    let cell = CURRENT_LOOP.with(|current| {
        current
            .borrow()
            .as_ref()
            .filter(|context| context.id == id)
            .map(|context| context.core.clone())
    })?;

    let mut core = cell.try_borrow_mut().ok()?;
    Some(function(&mut core))
}

//! Cancellation token and its source.

use super::CancelCode;
use crate::chain::Registration;
use crate::chain::sync::{FnContinuation, Node, SyncChain};
use crate::error::FutureError;
use crate::future::Deferred;
use crate::runtime::driver::default_loop;
use crate::runtime::executor::{Executor, TaskOptions};
use crate::runtime::handle::LoopHandle;
use crate::runtime::task::Work;

use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

struct TokenInner {
    code: AtomicU32,
    chain: SyncChain<CancelToken>,
    // Set for the shared token returned by `CancelToken::none`.
    never: bool,
    // This token's listener node in its parent's chain, for children only.
    parent_link: Mutex<Option<Registration>>,
}

impl TokenInner {
    fn release_parent(&self) {
        let link = self.parent_link.lock().take();
        if let Some(link) = link {
            link.dispose();
        }
    }
}

impl Drop for TokenInner {
    fn drop(&mut self) {
        if let Some(link) = self.parent_link.get_mut().take() {
            link.dispose();
        }
    }
}

/// Receives cancellation notifications registered with [`CancelToken::then_notify`].
pub trait CancelListener: Send + Sync {
    fn on_cancel(&self, token: &CancelToken);
}

/// Read-only view of a cancellation signal.
///
/// Cloning is cheap and every clone observes the same signal. Only the
/// originating [`CancelTokenSource`] can cancel it.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

/// Owner of a cancellation signal. Dereferences to its [`CancelToken`].
#[derive(Clone)]
pub struct CancelTokenSource {
    token: CancelToken,
}

impl CancelToken {
    fn new(never: bool) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                code: AtomicU32::new(0),
                chain: SyncChain::new(),
                never,
                parent_link: Mutex::new(None),
            }),
        }
    }

    /// A shared token that is never cancelled.
    ///
    /// Listeners registered on it are dropped immediately since they can never fire.
    pub fn none() -> CancelToken {
        static NONE: OnceLock<CancelToken> = OnceLock::new();
        NONE.get_or_init(|| CancelToken::new(true)).clone()
    }

    /// The current code; [`CancelCode::NONE`] until cancelled.
    pub fn code(&self) -> CancelCode {
        CancelCode::from_bits(self.inner.code.load(Ordering::Acquire))
    }

    pub fn reason(&self) -> u32 {
        self.code().reason()
    }

    pub fn degree(&self) -> u32 {
        self.code().degree()
    }

    pub fn is_cancelling(&self) -> bool {
        self.code().is_cancelling()
    }

    pub fn is_interruptible(&self) -> bool {
        self.code().is_interruptible()
    }

    pub fn is_without_remove(&self) -> bool {
        self.code().is_without_remove()
    }

    /// Returns `Err(FutureError::Cancelled)` once the token is cancelled.
    ///
    /// Long-running work polls this at safe points to honour cooperative cancellation.
    pub fn check_cancel(&self) -> Result<(), FutureError> {
        let code = self.code();
        if code.is_cancelling() {
            Err(FutureError::Cancelled(code))
        } else {
            Ok(())
        }
    }

    /// Returns true if both handles observe the same signal.
    pub fn same_token(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs `f` once the token is cancelled, inline on the cancelling thread.
    ///
    /// If the token is already cancelled, `f` runs before this call returns.
    pub fn then_run<F>(&self, f: F) -> Registration
    where
        F: FnOnce() + Send + 'static,
    {
        self.listen(None, TaskOptions::NONE, move |_| f())
    }

    /// Like [`CancelToken::then_run`], but hands the cancelled token to `f`.
    pub fn then_accept<F>(&self, f: F) -> Registration
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        self.listen(None, TaskOptions::NONE, f)
    }

    pub fn then_notify(&self, listener: Arc<dyn CancelListener>) -> Registration {
        self.listen(None, TaskOptions::NONE, move |token| {
            listener.on_cancel(&token)
        })
    }

    /// Cancels `target` with this token's code when this token is cancelled.
    pub fn then_transfer_to(&self, target: &CancelTokenSource) -> Registration {
        let target = target.clone();
        self.listen(None, TaskOptions::NONE, move |token| {
            let _ = target.cancel(token.code());
        })
    }

    pub fn then_run_async<F>(
        &self,
        executor: Arc<dyn Executor>,
        options: TaskOptions,
        f: F,
    ) -> Registration
    where
        F: FnOnce() + Send + 'static,
    {
        self.listen(Some(executor), options, move |_| f())
    }

    pub fn then_accept_async<F>(
        &self,
        executor: Arc<dyn Executor>,
        options: TaskOptions,
        f: F,
    ) -> Registration
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        self.listen(Some(executor), options, f)
    }

    pub fn then_notify_async(
        &self,
        executor: Arc<dyn Executor>,
        options: TaskOptions,
        listener: Arc<dyn CancelListener>,
    ) -> Registration {
        self.listen(Some(executor), options, move |token| {
            listener.on_cancel(&token)
        })
    }

    pub fn then_transfer_to_async(
        &self,
        executor: Arc<dyn Executor>,
        options: TaskOptions,
        target: &CancelTokenSource,
    ) -> Registration {
        let target = target.clone();
        self.listen(Some(executor), options, move |token| {
            let _ = target.cancel(token.code());
        })
    }

    /// Creates a source that is cancelled together with this token.
    ///
    /// The child can also be cancelled on its own without affecting this token.
    /// The parent only keeps a weak link to the child. The link is removed from
    /// the parent as soon as the child is cancelled or its last handle is dropped,
    /// so a long-lived parent can hand out any number of short-lived children.
    pub fn child(&self) -> CancelTokenSource {
        let child = CancelTokenSource::new();
        let weak = Arc::downgrade(&child.token.inner);
        let link = self.then_accept(move |token| {
            if let Some(inner) = weak.upgrade() {
                let target = CancelTokenSource {
                    token: CancelToken { inner },
                };
                let _ = target.cancel(token.code());
            }
        });
        *child.token.inner.parent_link.lock() = Some(link);

        let weak = Arc::downgrade(&child.token.inner);
        let _ = child.then_run(move || {
            if let Some(inner) = weak.upgrade() {
                inner.release_parent();
            }
        });
        child
    }

    fn listen<F>(
        &self,
        executor: Option<Arc<dyn Executor>>,
        options: TaskOptions,
        f: F,
    ) -> Registration
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        if self.inner.never {
            return Registration::fired();
        }

        let node = Node::new(executor, options, Box::new(FnContinuation(f)));
        self.inner.chain.register(node, || self.clone())
    }
}

impl Default for CancelTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelTokenSource {
    pub fn new() -> Self {
        Self {
            token: CancelToken::new(false),
        }
    }

    /// Returns a read-only handle.
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Cancels with `code`. Returns true if this call won.
    ///
    /// The first caller wins; every later call returns `Ok(false)` and leaves the
    /// stored code untouched. A code with a zero reason is rejected with
    /// [`FutureError::InvalidArgument`].
    pub fn cancel(&self, code: CancelCode) -> Result<bool, FutureError> {
        let code = code.check_cancelling()?;
        let inner = &self.token.inner;

        if inner
            .code
            .compare_exchange(0, code.bits(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        tracing::debug!(
            reason = code.reason(),
            degree = code.degree(),
            "cancellation requested"
        );
        inner.chain.fire_all(self.token.clone());
        Ok(true)
    }

    /// Cancels with `code` after `delay`, using the process-wide default loop.
    ///
    /// See [`CancelTokenSource::cancel_after_on`].
    pub fn cancel_after(
        &self,
        code: CancelCode,
        delay: Duration,
    ) -> Result<Deferred<()>, FutureError> {
        self.cancel_after_on(code, delay, &default_loop())
    }

    /// Cancels with `code` after `delay`, timed by `event_loop`.
    ///
    /// Returns the timer's future. If the token is cancelled some other way
    /// first, the timer is cancelled with that code and never fires.
    pub fn cancel_after_on(
        &self,
        code: CancelCode,
        delay: Duration,
        event_loop: &LoopHandle,
    ) -> Result<Deferred<()>, FutureError> {
        let code = code.check_cancelling()?;

        let source = self.clone();
        let timer = event_loop.schedule(
            Work::action(move || {
                let _ = source.cancel(code);
            }),
            delay,
        );

        let pending = timer.clone();
        let listener = self.then_accept(move |token| {
            if pending.is_pending() {
                pending.cancel(token.code());
            }
        });
        let _ = timer.on_completion(move |_| {
            listener.dispose();
        });

        Ok(timer)
    }
}

impl Deref for CancelTokenSource {
    type Target = CancelToken;

    fn deref(&self) -> &CancelToken {
        &self.token
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("code", &self.code())
            .finish()
    }
}

impl fmt::Debug for CancelTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelTokenSource")
            .field("code", &self.code())
            .finish()
    }
}

mod common;

use reactor_promise::{
    CancelCode, CancelListener, CancelToken, CancelTokenSource, FutureError, TaskOptions,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn test_code_bit_layout() {
    let code = CancelCode::new(5).unwrap().with_degree(3).with_interrupt().without_remove();

    assert_eq!(code.bits(), 5 | (3 << 20) | (1 << 28) | (1 << 29));
    assert_eq!(code.reason(), 5);
    assert_eq!(code.degree(), 3);
    assert!(code.is_interruptible());
    assert!(code.is_without_remove());
    assert!(code.is_cancelling());

    let decoded = CancelCode::from_bits(code.bits());
    assert_eq!(decoded, code, "layout is stable through raw bits");
}

#[test]
fn test_degree_is_clamped() {
    let code = CancelCode::DEFAULT.with_degree(99);
    assert_eq!(code.degree(), CancelCode::MAX_DEGREE);
    assert_eq!(code.reason(), CancelCode::REASON_DEFAULT, "reason untouched");
}

#[test]
fn test_reason_must_fit() {
    assert!(matches!(
        CancelCode::new(0),
        Err(FutureError::InvalidArgument(_))
    ));
    assert!(CancelCode::new(1 << 20).is_err(), "reason overflows into degree bits");
    assert!(CancelCode::new(CancelCode::REASON_MASK).is_ok());
    assert!(!CancelCode::NONE.is_cancelling());
}

#[test]
fn test_first_cancel_wins() {
    common::init_logging();
    let source = CancelTokenSource::new();
    let token = source.token();
    assert!(!token.is_cancelling());

    assert!(source.cancel(CancelCode::TIMEOUT).unwrap());
    assert!(!source.cancel(CancelCode::SHUTDOWN).unwrap(), "later cancel loses");
    assert_eq!(token.code(), CancelCode::TIMEOUT);
    assert_eq!(token.reason(), CancelCode::REASON_TIMEOUT);
}

#[test]
fn test_cancel_without_reason_is_rejected() {
    let source = CancelTokenSource::new();
    assert!(matches!(
        source.cancel(CancelCode::NONE.with_interrupt()),
        Err(FutureError::InvalidArgument(_))
    ));
    assert!(!source.is_cancelling(), "rejected cancel leaves the token untouched");
}

#[test]
fn test_listeners_fire_in_order_and_late_inline() {
    let source = CancelTokenSource::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let order = order.clone();
        let _ = source.then_run(move || order.lock().unwrap().push(i));
    }

    source.cancel(CancelCode::DEFAULT).unwrap();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

    let late = order.clone();
    let _ = source.then_accept(move |token| {
        late.lock().unwrap().push(token.reason() as i32 + 100);
    });
    assert_eq!(
        *order.lock().unwrap(),
        vec![0, 1, 2, 101],
        "listener on a cancelled token runs before returning"
    );
}

#[test]
fn test_disposed_listener_never_fires() {
    let source = CancelTokenSource::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    let registration = source.then_run(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(registration.dispose());

    source.cancel(CancelCode::DEFAULT).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn test_transfer_to_copies_the_code() {
    let upstream = CancelTokenSource::new();
    let downstream = CancelTokenSource::new();
    let _ = upstream.then_transfer_to(&downstream);

    let code = CancelCode::new(77).unwrap().with_degree(2);
    upstream.cancel(code).unwrap();
    assert_eq!(downstream.code(), code);
}

#[test]
fn test_child_follows_parent_but_not_the_reverse() {
    let parent = CancelTokenSource::new();
    let child = parent.child();

    let independent = parent.child();
    independent.cancel(CancelCode::DEFAULT).unwrap();
    assert!(!parent.is_cancelling(), "a child never cancels its parent");

    parent.cancel(CancelCode::SHUTDOWN).unwrap();
    assert_eq!(child.code(), CancelCode::SHUTDOWN);
    assert_eq!(
        independent.code(),
        CancelCode::DEFAULT,
        "an already cancelled child keeps its own code"
    );
}

struct Recorder {
    reasons: Mutex<Vec<u32>>,
}

impl CancelListener for Recorder {
    fn on_cancel(&self, token: &CancelToken) {
        self.reasons.lock().unwrap().push(token.reason());
    }
}

#[test]
fn test_notify_listener() {
    let source = CancelTokenSource::new();
    let recorder = Arc::new(Recorder {
        reasons: Mutex::new(Vec::new()),
    });

    let _ = source.then_notify(recorder.clone());
    source.cancel(CancelCode::new(12).unwrap()).unwrap();

    assert_eq!(*recorder.reasons.lock().unwrap(), vec![12]);
}

#[test]
fn test_check_cancel_inside_work() {
    let source = CancelTokenSource::new();
    let token = source.token();
    assert!(token.check_cancel().is_ok());

    source.cancel(CancelCode::TIMEOUT).unwrap();
    let error = token.check_cancel().unwrap_err();
    assert_eq!(error.cancel_code(), Some(CancelCode::TIMEOUT));
}

#[test]
fn test_none_token_never_cancels() {
    let token = CancelToken::none();
    assert!(!token.is_cancelling());
    assert!(token.same_token(&CancelToken::none()));

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let registration = token.then_run(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(!registration.dispose(), "nothing was linked");
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn test_async_listener_runs_on_the_loop() {
    let (event_loop, _clock) = common::manual_loop();
    let source = CancelTokenSource::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    let _ = source.then_run_async(event_loop.handle().executor(), TaskOptions::NONE, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    source.cancel(CancelCode::DEFAULT).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0, "queued, not run inline");

    event_loop.run_once();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cancel_after_fires_on_the_loop_clock() {
    let (event_loop, clock) = common::manual_loop();
    let source = CancelTokenSource::new();

    let timer = source
        .cancel_after_on(CancelCode::TIMEOUT, Duration::from_millis(50), &event_loop.handle())
        .unwrap();

    event_loop.run_once();
    assert!(!source.is_cancelling(), "not due yet");

    clock.advance(Duration::from_millis(50));
    event_loop.run_once();
    assert_eq!(source.code(), CancelCode::TIMEOUT);
    assert!(timer.is_succeeded());
    assert_eq!(event_loop.pending_tasks(), 0);
}

#[test]
fn test_cancel_after_is_withdrawn_by_earlier_cancel() {
    let (event_loop, clock) = common::manual_loop();
    let source = CancelTokenSource::new();
    let reason = Arc::new(AtomicU32::new(0));

    let timer = source
        .cancel_after_on(CancelCode::TIMEOUT, Duration::from_millis(50), &event_loop.handle())
        .unwrap();
    event_loop.run_once();
    assert_eq!(event_loop.pending_tasks(), 1);

    let sink = reason.clone();
    let _ = source.then_accept(move |token| sink.store(token.reason(), Ordering::SeqCst));
    source.cancel(CancelCode::DEFAULT).unwrap();

    assert!(timer.is_cancelled(), "the timer follows the token");
    assert_eq!(timer.exception_now(false).unwrap().cancel_code(), Some(CancelCode::DEFAULT));

    clock.advance(Duration::from_millis(100));
    event_loop.run_once();
    assert_eq!(event_loop.pending_tasks(), 0, "timer removed from the heap");
    assert_eq!(reason.load(Ordering::SeqCst), CancelCode::REASON_DEFAULT);
    assert_eq!(source.code(), CancelCode::DEFAULT);
}

#[test]
fn test_cancel_after_rejects_zero_reason() {
    let (event_loop, _clock) = common::manual_loop();
    let source = CancelTokenSource::new();

    let result = source.cancel_after_on(CancelCode::NONE, Duration::ZERO, &event_loop.handle());
    assert!(matches!(result, Err(FutureError::InvalidArgument(_))));
    assert_eq!(event_loop.queued_jobs(), 0);
}

mod common;

use reactor_promise::{
    CancelCode, CancelTokenSource, FutureError, Work, default_loop, shutdown_default_loop,
};
use std::time::Duration;

// The default loop is process-wide and cannot be restarted, so everything that
// touches it lives in this single test binary and test.
#[test]
fn test_default_loop_lifecycle() {
    common::init_logging();

    let handle = default_loop();
    assert!(!handle.in_event_loop(), "driven by its own thread");
    assert_eq!(default_loop().name(), handle.name(), "same loop on every call");

    let source = CancelTokenSource::new();
    let timer = source
        .cancel_after(CancelCode::TIMEOUT, Duration::from_millis(20))
        .unwrap();
    timer.join().unwrap();
    assert_eq!(source.code(), CancelCode::TIMEOUT);

    let answer = handle.submit(|| 40 + 2);
    assert_eq!(answer.join().unwrap(), 42);

    let pending = handle.schedule(Work::action(|| ()), Duration::from_secs(3600));

    shutdown_default_loop();
    assert!(handle.await_termination(Duration::from_secs(5)));
    assert_eq!(
        pending.exception_now(false).unwrap().cancel_code(),
        Some(CancelCode::SHUTDOWN),
        "an explicit shutdown settles timers that would otherwise be abandoned"
    );

    let rejected = default_loop().submit(|| 0);
    assert!(matches!(rejected.join(), Err(FutureError::Rejected)));

    let late = CancelTokenSource::new();
    let timer = late
        .cancel_after(CancelCode::TIMEOUT, Duration::ZERO)
        .unwrap();
    assert_eq!(
        timer.join().unwrap_err().cancel_code(),
        Some(CancelCode::SHUTDOWN),
        "timers on a stopped loop are cancelled, not run"
    );
    assert!(!late.is_cancelling());
}

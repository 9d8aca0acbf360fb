#![allow(dead_code)]

use reactor_promise::{EventLoop, EventLoopBuilder, ManualClock};
use std::sync::{Arc, Once};
use tracing::Level;

static INIT: Once = Once::new();

/// Routes library logs into the captured test output.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// A loop on the calling thread whose time only moves when the test says so.
pub fn manual_loop() -> (EventLoop, Arc<ManualClock>) {
    init_logging();
    let clock = Arc::new(ManualClock::new());
    let event_loop = EventLoopBuilder::new()
        .name("test")
        .clock(clock.clone())
        .build();
    (event_loop, clock)
}

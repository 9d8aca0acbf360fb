//! Background driver threads.
//!
//! A spawned loop is built and run on its own thread, so its owner thread (the
//! one `in_event_loop` compares against) is the driver itself. The handle is
//! sent back once the loop exists.
//!
//! The process-wide default loop is spawned the first time it is needed and is
//! never restarted: once [`shutdown_default_loop`] ran, the same handle keeps
//! rejecting work.
//!
//! Statics are never dropped in Rust, so nothing tears the default loop down
//! when `main` returns: its driver thread is simply abandoned and any pending
//! timers are neither run nor cancelled. Programs that need their default-loop
//! futures to settle call [`shutdown_default_loop`] on the way out and wait
//! with [`LoopHandle::await_termination`].

use crate::builder::EventLoopBuilder;
use crate::runtime::handle::LoopHandle;

use std::io;
use std::sync::OnceLock;
use std::sync::mpsc;
use std::thread;

static DEFAULT_LOOP: OnceLock<LoopHandle> = OnceLock::new();

const DEFAULT_LOOP_NAME: &str = "reactor-default";

/// Starts a driver thread running a loop built from `builder`.
pub(crate) fn spawn(builder: EventLoopBuilder) -> io::Result<LoopHandle> {
    let (sender, receiver) = mpsc::channel();
    let thread_name = builder.thread_name();

    thread::Builder::new().name(thread_name).spawn(move || {
        let event_loop = builder.build();
        if sender.send(event_loop.handle()).is_err() {
            return;
        }

        event_loop.run();
        tracing::debug!("driver thread exiting");
    })?;

    receiver
        .recv()
        .map_err(|_| io::Error::other("event loop driver exited during startup"))
}

/// Returns the process-wide default loop, spawning its driver on first use.
///
/// If the driver thread cannot be started, the returned handle is already shut
/// down and rejects all work.
pub fn default_loop() -> LoopHandle {
    DEFAULT_LOOP
        .get_or_init(|| {
            match EventLoopBuilder::new().name(DEFAULT_LOOP_NAME).spawn() {
                Ok(handle) => handle,
                Err(error) => {
                    tracing::error!(%error, "failed to start the default event loop");
                    LoopHandle::closed(DEFAULT_LOOP_NAME.to_owned())
                }
            }
        })
        .clone()
}

/// Shuts the default loop down if it was ever started.
///
/// Queued jobs are rejected and scheduled tasks are cancelled with
/// [`CancelCode::SHUTDOWN`](crate::CancelCode::SHUTDOWN). Call this before the
/// process exits; the default loop is not stopped automatically.
pub fn shutdown_default_loop() {
    if let Some(handle) = DEFAULT_LOOP.get() {
        handle.shutdown();
    }
}

//! Immediate-work queue of an event loop.
//!
//! Any thread may push; only the loop thread pops. Besides plain jobs the queue
//! carries the scheduling requests that other threads cannot apply to the
//! loop-owned task heap directly.

use crate::runtime::executor::Job;
use crate::runtime::task::{Schedulable, TaskId};

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};

/// A request handed to the loop thread.
pub(crate) enum Command {
    /// Run a job in FIFO order with other commands.
    Run(Job),
    /// Insert a task into the time-ordered heap.
    Schedule(Box<dyn Schedulable>),
    /// Remove a task from the heap if it is still there.
    Unschedule(TaskId),
}

/// Lock-free multi-producer FIFO with a shutdown flag.
pub(crate) struct JobQueue {
    commands: SegQueue<Command>,
    shutdown: AtomicBool,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            commands: SegQueue::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn push(&self, command: Command) {
        self.commands.push(command);
    }

    pub(crate) fn pop(&self) -> Option<Command> {
        self.commands.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Signals the loop to stop. Returns true for the first call.
    pub(crate) fn shutdown(&self) -> bool {
        !self.shutdown.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

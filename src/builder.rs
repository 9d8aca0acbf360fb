//! Fluent builder for event loops.

use crate::runtime::core::EventLoop;
use crate::runtime::driver;
use crate::runtime::handle::LoopHandle;
use crate::time::{Clock, SystemClock};

use std::io;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_NAME: &str = "reactor";
const DEFAULT_IDLE_PARK: Duration = Duration::from_millis(100);

/// Builder for [`EventLoop`] instances.
///
/// # Example
/// ```ignore
/// let event_loop = EventLoopBuilder::new().name("io").build();
/// let handle = EventLoopBuilder::new().name("timers").spawn()?;
/// ```
pub struct EventLoopBuilder {
    name: String,
    clock: Option<Arc<dyn Clock>>,
    idle_park: Duration,
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoopBuilder {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            clock: None,
            idle_park: DEFAULT_IDLE_PARK,
        }
    }

    /// Names the loop. Spawned loops also use it for their driver thread.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// Replaces the [`SystemClock`] every trigger time is measured with.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Upper bound on how long an idle loop parks before re-checking its clock.
    ///
    /// Matters for clocks that move without waking the loop, such as a
    /// [`ManualClock`](crate::ManualClock) advanced from another thread.
    pub fn idle_park(mut self, idle_park: Duration) -> Self {
        self.idle_park = idle_park;
        self
    }

    /// Builds a loop owned and driven by the calling thread.
    pub fn build(self) -> EventLoop {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        EventLoop::new(self.name, clock, self.idle_park)
    }

    /// Builds a loop on a dedicated driver thread and returns its handle.
    pub fn spawn(self) -> io::Result<LoopHandle> {
        driver::spawn(self)
    }

    pub(crate) fn thread_name(&self) -> String {
        format!("{}-driver", self.name)
    }
}

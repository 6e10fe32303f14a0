use crate::error::Result;
use crate::reactor::EventLoop;

use std::time::Duration;

/// Builder for configuring and creating an [`EventLoop`].
///
/// # Examples
///
/// ```rust,ignore
/// let el = LoopBuilder::new()
///     .granularity(Duration::from_millis(10))
///     .build()?;
/// el.start()?;
/// ```
pub struct LoopBuilder {
    granularity: Duration,
    watch_reserve: usize,
    timer_reserve: usize,
}

impl LoopBuilder {
    /// Creates a builder with the defaults: 10 ms tick granularity and a
    /// pool reserve of 16 slots each for watches and timers.
    pub fn new() -> Self {
        Self {
            granularity: Duration::from_millis(10),
            watch_reserve: 16,
            timer_reserve: 16,
        }
    }

    /// Sets the wall-clock width of one wheel tick.
    ///
    /// All timeouts are rounded up to whole ticks, and a timer may fire
    /// up to one tick later than requested.
    ///
    /// # Panics
    ///
    /// Panics if `granularity` is below one millisecond.
    pub fn granularity(mut self, granularity: Duration) -> Self {
        assert!(
            granularity >= Duration::from_millis(1),
            "granularity must be at least 1 ms"
        );
        self.granularity = granularity;
        self
    }

    /// Sets how many vacant watch slots the pool retains before
    /// returning memory to the allocator.
    pub fn watch_reserve(mut self, reserve: usize) -> Self {
        self.watch_reserve = reserve;
        self
    }

    /// Sets how many vacant timer slots the pool retains.
    pub fn timer_reserve(mut self, reserve: usize) -> Self {
        self.timer_reserve = reserve;
        self
    }

    /// Builds the loop: creates the kernel multiplexer and wake handle,
    /// zeroes the wheel, and samples the starting tick. The dispatch
    /// thread is not started until [`EventLoop::start`].
    pub fn build(self) -> Result<EventLoop> {
        EventLoop::from_parts(
            self.granularity.as_millis() as u64,
            self.watch_reserve,
            self.timer_reserve,
        )
    }
}

impl Default for LoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

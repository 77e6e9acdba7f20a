//! Time source seam
//!
//! The supervisor only sleeps and reads the current instant; both go through
//! [`Clock`] so the wait cycle can be driven by a virtual clock in tests.

use embassy_time::{Duration, Instant};

/// Monotonic time and timed sleeps
#[allow(async_fn_in_trait)]
pub trait Clock {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspends for `duration`
    async fn sleep(&mut self, duration: Duration);
}

/// The embassy time driver
#[cfg(feature = "firmware")]
pub struct SystemClock;

#[cfg(feature = "firmware")]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&mut self, duration: Duration) {
        embassy_time::Timer::after(duration).await;
    }
}

/// System clock the default RP235x configuration runs at
pub const DEFAULT_SYS_CLOCK_HZ: u32 = 150_000_000;

/// Processor frequency before and after the configured clock was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyChange {
    pub from_hz: u32,
    pub to_hz: u32,
}

impl FrequencyChange {
    pub fn new(from_hz: u32, to_hz: u32) -> Self {
        Self { from_hz, to_hz }
    }

    pub fn from_mhz(&self) -> u32 {
        self.from_hz / 1_000_000
    }

    pub fn to_mhz(&self) -> u32 {
        self.to_hz / 1_000_000
    }

    /// Whether the processor ended up on a different frequency
    pub fn changed(&self) -> bool {
        self.from_hz != self.to_hz
    }
}

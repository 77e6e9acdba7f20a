//! Watchdog Service
//!
//! Wraps the hardware watchdog. Once armed the countdown cannot be stopped by
//! software; if it is not fed within its timeout the chip resets
//! unconditionally. This is the last line of defense against any hang,
//! including a network call that never returns.
//!
//! The supervisor only feeds after a successful link probe, so the watchdog
//! also bounds how long the node keeps running without reaching its broker.

use embassy_time::Duration;

/// Hardware watchdog operations
pub trait Watchdog {
    /// Starts the countdown with `timeout`
    fn start(&mut self, timeout: Duration);

    /// Reloads the countdown
    fn feed(&mut self);

    /// Resets the chip immediately
    fn trigger_reset(&mut self);
}

/// The armed watchdog, exclusively owned by the supervisor
pub struct WatchdogService<W> {
    hw: W,
    timeout: Option<Duration>,
    feeds: u32,
}

impl<W: Watchdog> WatchdogService<W> {
    pub fn new(hw: W) -> Self {
        Self {
            hw,
            timeout: None,
            feeds: 0,
        }
    }

    /// Arms the hardware countdown
    ///
    /// The timeout is fixed for the rest of the boot; arming again is ignored.
    pub fn arm(&mut self, timeout: Duration) {
        if let Some(armed) = self.timeout {
            warn!("watchdog already armed with {} ms, ignoring", armed.as_millis());
            return;
        }
        self.hw.start(timeout);
        self.timeout = Some(timeout);
        info!("watchdog armed, timeout {} ms", timeout.as_millis());
    }

    /// Reloads the countdown; does nothing before [`arm`](Self::arm)
    pub fn feed(&mut self) {
        if self.timeout.is_some() {
            self.hw.feed();
            self.feeds = self.feeds.wrapping_add(1);
        }
    }

    /// Requests the unconditional hardware reset
    pub fn trigger_reset(&mut self) {
        warn!("triggering hardware reset");
        self.hw.trigger_reset();
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_armed(&self) -> bool {
        self.timeout.is_some()
    }

    /// Feeds since boot
    pub fn feeds(&self) -> u32 {
        self.feeds
    }

    pub fn hardware(&self) -> &W {
        &self.hw
    }
}

#[cfg(feature = "firmware")]
impl Watchdog for embassy_rp::watchdog::Watchdog {
    fn start(&mut self, timeout: Duration) {
        embassy_rp::watchdog::Watchdog::start(self, timeout);
    }

    fn feed(&mut self) {
        embassy_rp::watchdog::Watchdog::feed(self);
    }

    fn trigger_reset(&mut self) {
        embassy_rp::watchdog::Watchdog::trigger_reset(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        starts: Vec<Duration>,
        feeds: u32,
        resets: u32,
    }

    impl Watchdog for Counter {
        fn start(&mut self, timeout: Duration) {
            self.starts.push(timeout);
        }

        fn feed(&mut self) {
            self.feeds += 1;
        }

        fn trigger_reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn feeds_before_arming_are_dropped() {
        let mut wdt = WatchdogService::new(Counter::default());
        wdt.feed();
        assert_eq!(wdt.hw.feeds, 0);
        assert!(!wdt.is_armed());

        wdt.arm(Duration::from_secs(5));
        wdt.feed();
        wdt.feed();
        assert_eq!(wdt.hw.feeds, 2);
        assert_eq!(wdt.feeds(), 2);
    }

    #[test]
    fn arming_is_one_shot() {
        let mut wdt = WatchdogService::new(Counter::default());
        wdt.arm(Duration::from_secs(5));
        wdt.arm(Duration::from_secs(8));
        assert_eq!(wdt.hw.starts, vec![Duration::from_secs(5)]);
        assert_eq!(wdt.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn reset_reaches_the_hardware() {
        let mut wdt = WatchdogService::new(Counter::default());
        wdt.trigger_reset();
        assert_eq!(wdt.hw.resets, 1);
    }
}

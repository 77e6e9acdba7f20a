//! Uptime
//!
//! Time since boot, rendered as `D:HH:MM:SS`. Only used for display and
//! telemetry, never for control decisions.

use core::fmt;

use embassy_time::Instant;

/// Seconds elapsed since boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uptime {
    secs: u64,
}

impl Uptime {
    pub const fn from_secs(secs: u64) -> Self {
        Self { secs }
    }

    /// Uptime at `now` for a node that booted at `boot`
    ///
    /// Saturates at zero if `now` lies before `boot`.
    pub fn between(boot: Instant, now: Instant) -> Self {
        Self::from_secs(now.checked_duration_since(boot).map_or(0, |d| d.as_secs()))
    }

    pub fn as_secs(&self) -> u64 {
        self.secs
    }

    pub fn days(&self) -> u64 {
        self.secs / 86_400
    }

    pub fn hours(&self) -> u64 {
        self.secs / 3_600 % 24
    }

    pub fn minutes(&self) -> u64 {
        self.secs / 60 % 60
    }

    pub fn seconds(&self) -> u64 {
        self.secs % 60
    }
}

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:02}:{:02}:{:02}",
            self.days(),
            self.hours(),
            self.minutes(),
            self.seconds()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_days_unpadded_and_the_rest_two_digits() {
        assert_eq!(Uptime::from_secs(0).to_string(), "0:00:00:00");
        assert_eq!(Uptime::from_secs(59).to_string(), "0:00:00:59");
        assert_eq!(Uptime::from_secs(3_661).to_string(), "0:01:01:01");
        assert_eq!(Uptime::from_secs(86_399).to_string(), "0:23:59:59");
        assert_eq!(Uptime::from_secs(12 * 86_400 + 5 * 3_600 + 7).to_string(), "12:05:00:07");
    }

    #[test]
    fn measured_from_boot() {
        let boot = Instant::from_secs(100);
        assert_eq!(Uptime::between(boot, Instant::from_secs(190)).as_secs(), 90);
        assert_eq!(Uptime::between(boot, Instant::from_secs(50)).as_secs(), 0);
    }
}

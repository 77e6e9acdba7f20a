//! Supervisor State
//!
//! The supervisor loop is a small state machine:
//!
//! ```text
//! Boot -> Connecting -> Publishing <-> Waiting
//!              |             |
//!              +--> Faulted <+
//! ```
//!
//! `Faulted` is terminal: it tears the session down and resets the device, no
//! state survives it.

/// Supervisor loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SupervisorState {
    /// Nothing armed yet
    Boot,
    /// Watchdog armed, opening the broker session
    Connecting,
    /// Sending the telemetry and measurement records
    Publishing,
    /// Ticking through the publish interval, probing the link and feeding the watchdog
    Waiting,
    /// Terminal; triggers the hardware reset
    Faulted,
}

impl SupervisorState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Boot, Connecting)
                | (Connecting, Publishing)
                | (Connecting, Faulted)
                | (Publishing, Waiting)
                | (Publishing, Faulted)
                | (Waiting, Publishing)
        )
    }

    /// Updates the state, keeping the transition table honest in debug builds
    pub(crate) fn set(&mut self, next: SupervisorState) {
        debug_assert!(self.can_transition_to(next), "invalid supervisor transition");
        *self = next;
    }

    pub fn is_terminal(self) -> bool {
        self == SupervisorState::Faulted
    }
}

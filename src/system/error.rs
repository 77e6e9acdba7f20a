//! Error Types
//!
//! Every failure the node can observe ends in one of two places: it is
//! absorbed into an `Unreachable` probe result (and so withholds a watchdog
//! feed), or it becomes a [`Fault`] that sends the supervisor to its terminal
//! state and resets the device. Nothing is retried in place.

use core::fmt;

use crate::task::message::Category;

/// Transport level failures of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// Broker host name could not be resolved
    Resolve,
    /// TCP connection could not be established
    Tcp,
    /// Broker rejected or did not complete the MQTT handshake
    Handshake,
    /// Sending on an established session failed
    Send,
    /// Operation needs a connected session
    NotConnected,
    /// The session's buffers were already handed to an earlier connection
    Exhausted,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Resolve => "broker address could not be resolved",
            Self::Tcp => "tcp connection failed",
            Self::Handshake => "mqtt handshake failed",
            Self::Send => "send failed",
            Self::NotConnected => "session is not connected",
            Self::Exhausted => "session can only be opened once per boot",
        };
        f.write_str(text)
    }
}

/// The broker session could not be established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionError {
    pub cause: SessionError,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection to broker failed: {}", self.cause)
    }
}

/// A message could not be rendered into its fixed size buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FormatError {
    /// Message does not fit the buffer
    Capacity,
    /// Field value is NaN or infinite
    NonFinite(&'static str),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity => f.write_str("message exceeds buffer capacity"),
            Self::NonFinite(field) => write!(f, "field {field} is not a finite number"),
        }
    }
}

impl From<fmt::Error> for FormatError {
    fn from(_: fmt::Error) -> Self {
        Self::Capacity
    }
}

/// A single publish did not go out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError {
    /// The record could not be formatted
    Format { category: Category, cause: FormatError },
    /// The session reported a transport error
    Transport { category: Category, cause: SessionError },
}

impl PublishError {
    /// Message category that failed
    pub fn category(&self) -> Category {
        match self {
            Self::Format { category, .. } | Self::Transport { category, .. } => *category,
        }
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format { category, cause } => {
                write!(f, "{} message not formatted: {cause}", category.as_str())
            }
            Self::Transport { category, cause } => {
                write!(f, "{} message not sent: {cause}", category.as_str())
            }
        }
    }
}

/// Environmental or internal sensor read failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// I2C transfer failed
    Bus,
    /// Sensor still busy after the conversion time
    Busy,
    /// Frame checksum mismatch
    Checksum,
    /// Internal temperature ADC read failed
    Adc,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Bus => "sensor bus transfer failed",
            Self::Busy => "sensor did not finish its measurement",
            Self::Checksum => "sensor frame checksum mismatch",
            Self::Adc => "internal temperature read failed",
        };
        f.write_str(text)
    }
}

/// Why a link probe came back unreachable
///
/// Only ever logged; the probe itself reports `Unreachable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProbeFailure {
    Resolve,
    Refused,
    Timeout,
}

/// Terminal failure of the supervisor loop; always followed by a reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    Connection(ConnectionError),
    Publish(PublishError),
    Sensor(SensorError),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => e.fmt(f),
            Self::Publish(e) => e.fmt(f),
            Self::Sensor(e) => e.fmt(f),
        }
    }
}

impl From<ConnectionError> for Fault {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e)
    }
}

impl From<PublishError> for Fault {
    fn from(e: PublishError) -> Self {
        Self::Publish(e)
    }
}

impl From<SensorError> for Fault {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

//! Node Configuration
//!
//! The node is configured at build time: every setting is read from a
//! `SENSOR_NODE_*` environment variable when the firmware is compiled and baked
//! into the image. At boot the raw strings are parsed and validated once into an
//! immutable [`NodeConfig`] snapshot, which is then handed to every component
//! through the node context.
//!
//! # Settings
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `SENSOR_NODE_WIFI_SSID` | required | Wireless network name |
//! | `SENSOR_NODE_WIFI_PASSWORD` | empty | Wireless passphrase |
//! | `SENSOR_NODE_MQTT_BROKER` | required | Broker host name or IPv4 address |
//! | `SENSOR_NODE_MQTT_PORT` | 1883 | Broker TCP port |
//! | `SENSOR_NODE_MQTT_USER` / `_PASSWORD` | empty | Broker credentials |
//! | `SENSOR_NODE_MQTT_TOPIC` | `sensors` | Topic all messages go to |
//! | `SENSOR_NODE_CLIENT_ID` | required | MQTT client id, also the device id tag |
//! | `SENSOR_NODE_DEVICE_TYPE` | `PicoW` | Device type tag |
//! | `SENSOR_NODE_VERSION` | `1.4` | Firmware version tag |
//! | `SENSOR_NODE_PUBLISH_INTERVAL` | 60 | Seconds between publish cycles |
//! | `SENSOR_NODE_LOG_LEVEL` | 1 | Console verbosity, 0..=3 |
//! | `SENSOR_NODE_SENSOR_IN_USE` | true | false publishes simulated readings |
//! | `SENSOR_NODE_WATCHDOG_MS` | 5000 | Hardware watchdog timeout |
//! | `SENSOR_NODE_PROBE_TIMEOUT_MS` | 2000 | Upper bound for one link probe |
//! | `SENSOR_NODE_CPU_FREQ_HZ` | 72000000 | System clock frequency |

use core::fmt;

use embassy_time::Duration;

/// Default broker port (plain MQTT)
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default topic for all published messages
const DEFAULT_TOPIC: &str = "sensors";

/// Default device type tag
const DEFAULT_DEVICE_TYPE: &str = "PicoW";

/// Default firmware version tag
const DEFAULT_VERSION: &str = "1.4";

/// Default seconds between two publish cycles
const DEFAULT_PUBLISH_INTERVAL: u32 = 60;

/// Deployed watchdog timeout (5s)
const DEFAULT_WATCHDOG_MS: u64 = 5_000;

/// Default upper bound for a single link probe
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Underclocked system frequency, 6 x 12MHz crystal
const DEFAULT_CPU_FREQ_HZ: u32 = 72_000_000;

/// Longest timeout the watchdog counter can hold on every supported chip
pub const WATCHDOG_MAX_MS: u64 = 8_300;

/// Length limit for identity tags, keeps every message inside its buffer
pub const MAX_TAG_LEN: usize = 32;

/// Number of wireless association attempts before giving up
pub const WIFI_JOIN_ATTEMPTS: u8 = 10;

/// Length of one supervisor wait tick
pub const TICK: Duration = Duration::from_secs(1);

/// Raw configuration strings as they were supplied at build time
///
/// `None` means the variable was not set.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawConfig {
    pub wifi_ssid: Option<&'static str>,
    pub wifi_password: Option<&'static str>,
    pub mqtt_broker: Option<&'static str>,
    pub mqtt_port: Option<&'static str>,
    pub mqtt_user: Option<&'static str>,
    pub mqtt_password: Option<&'static str>,
    pub mqtt_topic: Option<&'static str>,
    pub client_id: Option<&'static str>,
    pub device_type: Option<&'static str>,
    pub version: Option<&'static str>,
    pub publish_interval: Option<&'static str>,
    pub log_level: Option<&'static str>,
    pub sensor_in_use: Option<&'static str>,
    pub watchdog_ms: Option<&'static str>,
    pub probe_timeout_ms: Option<&'static str>,
    pub cpu_freq_hz: Option<&'static str>,
}

impl RawConfig {
    /// Captures the `SENSOR_NODE_*` variables of the build environment
    pub const fn from_build_env() -> Self {
        Self {
            wifi_ssid: option_env!("SENSOR_NODE_WIFI_SSID"),
            wifi_password: option_env!("SENSOR_NODE_WIFI_PASSWORD"),
            mqtt_broker: option_env!("SENSOR_NODE_MQTT_BROKER"),
            mqtt_port: option_env!("SENSOR_NODE_MQTT_PORT"),
            mqtt_user: option_env!("SENSOR_NODE_MQTT_USER"),
            mqtt_password: option_env!("SENSOR_NODE_MQTT_PASSWORD"),
            mqtt_topic: option_env!("SENSOR_NODE_MQTT_TOPIC"),
            client_id: option_env!("SENSOR_NODE_CLIENT_ID"),
            device_type: option_env!("SENSOR_NODE_DEVICE_TYPE"),
            version: option_env!("SENSOR_NODE_VERSION"),
            publish_interval: option_env!("SENSOR_NODE_PUBLISH_INTERVAL"),
            log_level: option_env!("SENSOR_NODE_LOG_LEVEL"),
            sensor_in_use: option_env!("SENSOR_NODE_SENSOR_IN_USE"),
            watchdog_ms: option_env!("SENSOR_NODE_WATCHDOG_MS"),
            probe_timeout_ms: option_env!("SENSOR_NODE_PROBE_TIMEOUT_MS"),
            cpu_freq_hz: option_env!("SENSOR_NODE_CPU_FREQ_HZ"),
        }
    }
}

/// Wireless station credentials
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WifiConfig {
    pub ssid: &'static str,
    pub password: &'static str,
}

/// Broker endpoint and session settings
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrokerConfig {
    pub host: &'static str,
    pub port: u16,
    pub username: &'static str,
    pub password: &'static str,
    pub topic: &'static str,
    pub client_id: &'static str,
}

/// Identity tags stamped onto every message
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    pub device_type: &'static str,
    pub version: &'static str,
}

/// Console verbosity threshold
///
/// A message of level `n` is shown when the configured verbosity is `n` or
/// higher. Level 1 reports readings and state changes, level 3 adds per tick
/// probe and feed diagnostics plus the formatted message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Verbosity(u8);

impl Verbosity {
    pub const QUIET: Self = Self(0);
    pub const INFO: Self = Self(1);
    pub const DETAIL: Self = Self(2);
    pub const TRACE: Self = Self(3);

    /// Whether messages of `level` should be printed
    pub fn allows(self, level: Verbosity) -> bool {
        self >= level
    }
}

/// Validated, immutable node configuration
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    pub wifi: WifiConfig,
    pub broker: BrokerConfig,
    pub device: DeviceConfig,
    /// Wait ticks between two publish cycles
    pub publish_interval: u32,
    pub watchdog_timeout: Duration,
    pub probe_timeout: Duration,
    pub verbosity: Verbosity,
    /// false: publish fixed simulated readings instead of querying the sensor
    pub sensor_in_use: bool,
    pub cpu_freq_hz: u32,
}

/// Reasons a configuration is rejected at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A required variable was not set or is empty
    Missing(&'static str),
    /// A numeric variable could not be parsed
    InvalidNumber(&'static str),
    /// A boolean variable is not one of true/false/yes/no/1/0
    InvalidFlag(&'static str),
    /// Verbosity outside 0..=3
    InvalidLogLevel,
    PortZero,
    PublishIntervalZero,
    /// Watchdog timeout outside 1ms..=[`WATCHDOG_MAX_MS`]
    WatchdogOutOfRange,
    /// One tick plus a worst case probe would starve the watchdog
    ProbeOutlastsWatchdog,
    /// Identity tag contains a line protocol separator or is too long
    InvalidTag(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(name) => write!(f, "{name} is not set"),
            Self::InvalidNumber(name) => write!(f, "{name} is not a valid number"),
            Self::InvalidFlag(name) => write!(f, "{name} is not a valid flag"),
            Self::InvalidLogLevel => write!(f, "log level must be between 0 and 3"),
            Self::PortZero => write!(f, "broker port must not be 0"),
            Self::PublishIntervalZero => write!(f, "publish interval must be at least 1s"),
            Self::WatchdogOutOfRange => {
                write!(f, "watchdog timeout must be between 1 and {WATCHDOG_MAX_MS} ms")
            }
            Self::ProbeOutlastsWatchdog => {
                write!(f, "tick plus probe timeout must be shorter than the watchdog timeout")
            }
            Self::InvalidTag(name) => write!(
                f,
                "{name} must be 1..={MAX_TAG_LEN} characters without spaces, commas or '='"
            ),
        }
    }
}

impl NodeConfig {
    /// Parses and validates the raw build-time settings
    pub fn parse(raw: &RawConfig) -> Result<Self, ConfigError> {
        let config = Self {
            wifi: WifiConfig {
                ssid: required(raw.wifi_ssid, "SENSOR_NODE_WIFI_SSID")?,
                password: raw.wifi_password.unwrap_or(""),
            },
            broker: BrokerConfig {
                host: required(raw.mqtt_broker, "SENSOR_NODE_MQTT_BROKER")?,
                port: number(raw.mqtt_port, "SENSOR_NODE_MQTT_PORT", DEFAULT_MQTT_PORT)?,
                username: raw.mqtt_user.unwrap_or(""),
                password: raw.mqtt_password.unwrap_or(""),
                topic: non_empty(raw.mqtt_topic).unwrap_or(DEFAULT_TOPIC),
                client_id: required(raw.client_id, "SENSOR_NODE_CLIENT_ID")?,
            },
            device: DeviceConfig {
                device_type: non_empty(raw.device_type).unwrap_or(DEFAULT_DEVICE_TYPE),
                version: non_empty(raw.version).unwrap_or(DEFAULT_VERSION),
            },
            publish_interval: number(
                raw.publish_interval,
                "SENSOR_NODE_PUBLISH_INTERVAL",
                DEFAULT_PUBLISH_INTERVAL,
            )?,
            watchdog_timeout: Duration::from_millis(number(
                raw.watchdog_ms,
                "SENSOR_NODE_WATCHDOG_MS",
                DEFAULT_WATCHDOG_MS,
            )?),
            probe_timeout: Duration::from_millis(number(
                raw.probe_timeout_ms,
                "SENSOR_NODE_PROBE_TIMEOUT_MS",
                DEFAULT_PROBE_TIMEOUT_MS,
            )?),
            verbosity: log_level(raw.log_level)?,
            sensor_in_use: flag(raw.sensor_in_use, "SENSOR_NODE_SENSOR_IN_USE", true)?,
            cpu_freq_hz: number(raw.cpu_freq_hz, "SENSOR_NODE_CPU_FREQ_HZ", DEFAULT_CPU_FREQ_HZ)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the supervisor relies on
    ///
    /// The central one: a wait tick (sleep plus one bounded probe) must always
    /// end before the watchdog deadline, otherwise a healthy link would still
    /// reset the node.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.port == 0 {
            return Err(ConfigError::PortZero);
        }
        if self.publish_interval == 0 {
            return Err(ConfigError::PublishIntervalZero);
        }
        let watchdog_ms = self.watchdog_timeout.as_millis();
        if watchdog_ms == 0 || watchdog_ms > WATCHDOG_MAX_MS {
            return Err(ConfigError::WatchdogOutOfRange);
        }
        if TICK + self.probe_timeout >= self.watchdog_timeout {
            return Err(ConfigError::ProbeOutlastsWatchdog);
        }
        check_tag(self.broker.client_id, "SENSOR_NODE_CLIENT_ID")?;
        check_tag(self.device.device_type, "SENSOR_NODE_DEVICE_TYPE")?;
        check_tag(self.device.version, "SENSOR_NODE_VERSION")?;
        Ok(())
    }
}

fn non_empty(value: Option<&'static str>) -> Option<&'static str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required(value: Option<&'static str>, name: &'static str) -> Result<&'static str, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing(name))
}

fn number<T: core::str::FromStr>(
    value: Option<&'static str>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match non_empty(value) {
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidNumber(name)),
        None => Ok(default),
    }
}

fn flag(value: Option<&'static str>, name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(v) = non_empty(value) else {
        return Ok(default);
    };
    if ["true", "yes", "1"].iter().any(|t| v.eq_ignore_ascii_case(t)) {
        Ok(true)
    } else if ["false", "no", "0"].iter().any(|f| v.eq_ignore_ascii_case(f)) {
        Ok(false)
    } else {
        Err(ConfigError::InvalidFlag(name))
    }
}

fn log_level(value: Option<&'static str>) -> Result<Verbosity, ConfigError> {
    let level: u8 = number(value, "SENSOR_NODE_LOG_LEVEL", Verbosity::INFO.0)?;
    if level > Verbosity::TRACE.0 {
        return Err(ConfigError::InvalidLogLevel);
    }
    Ok(Verbosity(level))
}

fn check_tag(tag: &str, name: &'static str) -> Result<(), ConfigError> {
    let valid = !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && !tag.contains(|c: char| c == ' ' || c == ',' || c == '=' || c == '"');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidTag(name))
    }
}

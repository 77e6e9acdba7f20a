//! Node Context
//!
//! Everything that is fixed once the node has booted and joined the wireless
//! network: the configuration snapshot, the boot instant and the network
//! identity. Built once in `main` and lent to every component.

use core::fmt;
use core::net::Ipv4Addr;

use embassy_time::Instant;

use crate::system::config::NodeConfig;
use crate::system::uptime::Uptime;
use crate::task::message::DeviceIdentity;

/// Hardware address of the wireless interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacAddress(pub [u8; 6]);

/// Lowercase hex without separators, e.g. `28cdc1a2b3c4`
impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Addresses reported in the node's telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub mac: MacAddress,
    pub ip: Ipv4Addr,
}

/// Immutable per-boot state shared by all components
#[derive(Debug)]
pub struct NodeContext {
    pub config: NodeConfig,
    /// Recorded once at process start
    boot: Instant,
    pub network: NetworkIdentity,
}

impl NodeContext {
    pub fn new(config: NodeConfig, boot: Instant, network: NetworkIdentity) -> Self {
        Self { config, boot, network }
    }

    /// Uptime at `now`
    pub fn uptime(&self, now: Instant) -> Uptime {
        Uptime::between(self.boot, now)
    }

    /// Tags stamped onto every published message
    pub fn identity(&self) -> DeviceIdentity<'_> {
        DeviceIdentity {
            client_id: self.config.broker.client_id,
            device_type: self.config.device.device_type,
            version: self.config.device.version,
        }
    }
}

pub mod dht20;
pub mod link_health;
pub mod message;
pub mod publisher;
pub mod sensor;
pub mod supervisor;
pub mod watchdog;
#[cfg(feature = "firmware")]
pub mod wifi;

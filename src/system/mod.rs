//! Core system components for node operation
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
#[cfg(feature = "firmware")]
pub mod resources;
pub mod state;
pub mod uptime;

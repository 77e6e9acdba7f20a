//! Sensor node core
//!
//! Connectivity supervision and publish cadence for a solar powered
//! temperature/humidity node. The hardware independent parts live here so they
//! can be exercised on the host; the `firmware` feature adds the RP235x and
//! CYW43 adapters used by the binary.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

/// Core system components: configuration, context, errors, state
pub mod system;
/// Components driven by the supervisor loop
pub mod task;

//! Build script
//!
//! Puts `memory.x` on the linker search path for firmware builds and makes
//! sure the compile-time node configuration is picked up when it changes.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Environment variables baked into the firmware by `RawConfig::from_build_env`
const CONFIG_VARS: &[&str] = &[
    "SENSOR_NODE_WIFI_SSID",
    "SENSOR_NODE_WIFI_PASSWORD",
    "SENSOR_NODE_MQTT_BROKER",
    "SENSOR_NODE_MQTT_PORT",
    "SENSOR_NODE_MQTT_USER",
    "SENSOR_NODE_MQTT_PASSWORD",
    "SENSOR_NODE_MQTT_TOPIC",
    "SENSOR_NODE_CLIENT_ID",
    "SENSOR_NODE_DEVICE_TYPE",
    "SENSOR_NODE_VERSION",
    "SENSOR_NODE_PUBLISH_INTERVAL",
    "SENSOR_NODE_LOG_LEVEL",
    "SENSOR_NODE_SENSOR_IN_USE",
    "SENSOR_NODE_WATCHDOG_MS",
    "SENSOR_NODE_PROBE_TIMEOUT_MS",
    "SENSOR_NODE_CPU_FREQ_HZ",
];

fn main() {
    for var in CONFIG_VARS {
        println!("cargo:rerun-if-env-changed={var}");
    }

    // host builds (tests) link against std, nothing else to do
    if env::var_os("CARGO_FEATURE_FIRMWARE").is_none() {
        return;
    }

    let out = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
    File::create(out.join("memory.x"))
        .expect("create memory.x")
        .write_all(include_bytes!("memory.x"))
        .expect("write memory.x");
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=memory.x");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}

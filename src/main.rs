//! Sensor node firmware entry point
//!
//! Sets the clock, joins the wireless network, wires the adapters into the
//! supervisor and hands over control. The supervisor only returns after it
//! has requested a reset.

#![no_std]
#![no_main]

use defmt::{error, info, warn};
use embassy_executor::Spawner;
use embassy_rp::block::ImageDef;
use embassy_rp::clocks::{clk_sys_freq, ClockConfig};
use embassy_rp::config::Config;
use embassy_rp::watchdog::Watchdog;
use embassy_time::{Duration, Instant, Timer};
use sensor_node::system::clock::{FrequencyChange, SystemClock, DEFAULT_SYS_CLOCK_HZ};
use sensor_node::system::config::{NodeConfig, RawConfig};
use sensor_node::system::context::NodeContext;
use sensor_node::system::resources;
use sensor_node::task::link_health::TcpProbe;
use sensor_node::task::publisher::{MqttSession, SessionBuffers};
use sensor_node::task::sensor::BoardSensors;
use sensor_node::task::supervisor::{Components, Supervisor};
use sensor_node::task::wifi;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

/// Firmware image type for bootloader
#[link_section = ".start_block"]
#[used]
pub static IMAGE_DEF: ImageDef = ImageDef::secure_exe();

/// TCP socket buffers of the broker connection
const TCP_BUFFER: usize = 1024;

/// MQTT packet buffers, large enough for one line message plus headers
const MQTT_BUFFER: usize = 512;

static CONTEXT: StaticCell<NodeContext> = StaticCell::new();
static TCP_RX: StaticCell<[u8; TCP_BUFFER]> = StaticCell::new();
static TCP_TX: StaticCell<[u8; TCP_BUFFER]> = StaticCell::new();
static MQTT_RX: StaticCell<[u8; MQTT_BUFFER]> = StaticCell::new();
static MQTT_TX: StaticCell<[u8; MQTT_BUFFER]> = StaticCell::new();

/// Firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let parsed = NodeConfig::parse(&RawConfig::from_build_env());

    let (hw_config, requested_hz) = match &parsed {
        Ok(config) => match ClockConfig::system_freq(config.cpu_freq_hz) {
            Ok(clocks) => (Config::new(clocks), Some(config.cpu_freq_hz)),
            Err(_) => (Config::default(), None),
        },
        Err(_) => (Config::default(), None),
    };
    let p = embassy_rp::init(hw_config);
    let boot = Instant::now();

    let config = match parsed {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            park().await
        }
    };

    info!("--------------------------------------------------------------------------------");
    info!(
        "------  Solar sensor node  device: {}  version: {}",
        config.broker.client_id,
        config.device.version
    );
    info!("--------------------------------------------------------------------------------");
    let change = FrequencyChange::new(DEFAULT_SYS_CLOCK_HZ, clk_sys_freq());
    if requested_hz.is_none() {
        warn!(
            "{} Hz is not a reachable system clock, keeping the default",
            config.cpu_freq_hz
        );
    }
    if change.changed() {
        info!(
            "processor frequency changed from {} MHz to {} MHz",
            change.from_mhz(),
            change.to_mhz()
        );
    } else {
        info!("processor frequency {} MHz", change.to_mhz());
    }

    let r = resources::split(p);
    // The ADC must be in place before anything samples the temperature channel
    resources::init_adc(r.analog.adc);
    let mut watchdog = Watchdog::new(r.watchdog.watchdog);

    let link = match wifi::connect(spawner, r.wireless, &config.wifi).await {
        Ok(link) => link,
        Err(e) => {
            error!("wireless network unavailable ({}), resetting", e);
            watchdog.trigger_reset();
            park().await
        }
    };
    // keeps the radio driver handle alive for the rest of the boot
    let _control = link.control;
    info!(
        "connected to {}, IP {}, MAC {}",
        config.wifi.ssid,
        defmt::Display2Format(&link.identity.ip),
        defmt::Display2Format(&link.identity.mac)
    );

    let ctx: &'static NodeContext = CONTEXT.init(NodeContext::new(config, boot, link.identity));

    let sensors = match BoardSensors::new(
        r.environment_sensor,
        r.internal_temperature,
        ctx.config.sensor_in_use,
    )
    .await
    {
        Ok(sensors) => sensors,
        Err(e) => {
            error!("sensor setup failed: {}, resetting", e);
            watchdog.trigger_reset();
            park().await
        }
    };

    let session = MqttSession::new(
        link.stack,
        &ctx.config.broker,
        SessionBuffers {
            tcp_rx: TCP_RX.init([0; TCP_BUFFER]),
            tcp_tx: TCP_TX.init([0; TCP_BUFFER]),
            mqtt_rx: MQTT_RX.init([0; MQTT_BUFFER]),
            mqtt_tx: MQTT_TX.init([0; MQTT_BUFFER]),
        },
    );
    let probe = TcpProbe::new(link.stack, ctx.config.probe_timeout);

    let mut supervisor = Supervisor::new(
        ctx,
        Components {
            session,
            probe,
            watchdog,
            sensors,
            clock: SystemClock,
        },
    );
    let fault = supervisor.run().await;
    error!("supervisor stopped: {}", fault);
    park().await
}

/// Idles until the watchdog or a requested reset restarts the chip
async fn park() -> ! {
    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}

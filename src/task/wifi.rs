//! Wireless Association
//!
//! Brings up the CYW43439 over PIO SPI, joins the configured network and
//! waits for a DHCP lease. The chip driver and the network stack each run in
//! their own executor task; everything after that talks to the returned
//! [`Stack`].
//!
//! # Join Policy
//! Up to [`WIFI_JOIN_ATTEMPTS`] attempts, each preceded by a short settle
//! delay and followed by a long back-off when it fails. Running out of
//! attempts is returned to `main`, which resets the node.

use cyw43::{Control, JoinOptions};
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use embassy_executor::Spawner;
use embassy_net::{Config as NetConfig, Stack, StackResources};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIO0};
use embassy_rp::pio::Pio;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use static_cell::StaticCell;

use crate::system::config::{WifiConfig, WIFI_JOIN_ATTEMPTS};
use crate::system::context::{MacAddress, NetworkIdentity};
use crate::system::resources::{Irqs, WirelessResources};

/// Delay before every join attempt
const JOIN_SETTLE: Duration = Duration::from_secs(1);

/// Delay after a failed join attempt
const JOIN_BACKOFF: Duration = Duration::from_secs(11);

/// Upper bound for obtaining a DHCP lease
const DHCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Sockets: DHCP, DNS, the broker session and the link probe
const SOCKETS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum WifiError {
    /// Driver or stack task could not be spawned
    Spawn,
    /// Every join attempt failed
    Join,
    /// No DHCP lease within the timeout
    Dhcp,
}

/// An associated interface with an IPv4 address
pub struct Link {
    pub stack: Stack<'static>,
    pub identity: NetworkIdentity,
    /// Kept so the chip stays under control for the rest of the boot
    pub control: Control<'static>,
}

type Spi = PioSpi<'static, PIO0, 0, DMA_CH0>;

#[embassy_executor::task]
async fn cyw43_task(runner: cyw43::Runner<'static, Output<'static>, Spi>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

/// Powers the radio, joins `wifi` and waits for an address
pub async fn connect(
    spawner: Spawner,
    r: WirelessResources,
    wifi: &WifiConfig,
) -> Result<Link, WifiError> {
    let fw = include_bytes!("../../cyw43-firmware/43439A0.bin");
    let clm = include_bytes!("../../cyw43-firmware/43439A0_clm.bin");

    let pwr = Output::new(r.pwr_pin, Level::Low);
    let cs = Output::new(r.cs_pin, Level::High);
    let mut pio = Pio::new(r.pio, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        r.dio_pin,
        r.clk_pin,
        r.dma,
    );

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    spawner.spawn(cyw43_task(runner)).map_err(|_| WifiError::Spawn)?;

    control.init(clm).await;
    control
        .set_power_management(cyw43::PowerManagementMode::PowerSave)
        .await;

    let mac = MacAddress(control.address().await);
    info!("wireless chip up, MAC {}", defmt::Display2Format(&mac));

    let mut seed_bytes = [0u8; 8];
    seed_bytes[..6].copy_from_slice(&mac.0);
    let seed = u64::from_le_bytes(seed_bytes) ^ Instant::now().as_ticks();

    static RESOURCES: StaticCell<StackResources<SOCKETS>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        net_device,
        NetConfig::dhcpv4(Default::default()),
        RESOURCES.init(StackResources::new()),
        seed,
    );
    spawner.spawn(net_task(runner)).map_err(|_| WifiError::Spawn)?;

    join(&mut control, wifi).await?;

    with_timeout(DHCP_TIMEOUT, stack.wait_config_up())
        .await
        .map_err(|_| WifiError::Dhcp)?;
    let ip = stack
        .config_v4()
        .map(|config| config.address.address())
        .ok_or(WifiError::Dhcp)?;
    info!("address {} assigned", defmt::Display2Format(&ip));

    Ok(Link {
        stack,
        identity: NetworkIdentity { mac, ip },
        control,
    })
}

async fn join(control: &mut Control<'static>, wifi: &WifiConfig) -> Result<(), WifiError> {
    for attempt in 1..=WIFI_JOIN_ATTEMPTS {
        Timer::after(JOIN_SETTLE).await;
        let options = if wifi.password.is_empty() {
            JoinOptions::new_open()
        } else {
            JoinOptions::new(wifi.password.as_bytes())
        };
        match control.join(wifi.ssid, options).await {
            Ok(()) => {
                info!("joined {} on attempt {}", wifi.ssid, attempt);
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "join attempt {}/{} failed, status {}",
                    attempt,
                    WIFI_JOIN_ATTEMPTS,
                    e.status
                );
                if attempt < WIFI_JOIN_ATTEMPTS {
                    Timer::after(JOIN_BACKOFF).await;
                }
            }
        }
    }
    Err(WifiError::Join)
}

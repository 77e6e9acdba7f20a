//! Hardware Resource Management
//!
//! Allocates the board's pins and peripherals to the components that use them.
//!
//! # Resource Groups
//! - Wireless: CYW43439 power/chip-select plus the PIO SPI data and clock pins
//! - Environment sensor: DHT20 on I2C0 (SDA GP0, SCL GP1)
//! - Internal temperature: the ADC temperature sensor channel
//! - Analog: the ADC itself, moved into the shared slot by [`init_adc`]
//! - Watchdog: the hardware watchdog, owned by the supervisor
//!
//! # Shared Resources
//! The ADC lives behind a mutex, like every analog read on this board family.
//! Acquire the lock for the conversion only and release it promptly.

use assign_resources::assign_resources;
use embassy_rp::adc::InterruptHandler as AdcInterruptHandler;
use embassy_rp::adc::{Adc, Async as AdcAsync};
use embassy_rp::bind_interrupts;
use embassy_rp::i2c::InterruptHandler as I2cInterruptHandler;
use embassy_rp::peripherals::{self, ADC, I2C0, PIO0};
use embassy_rp::Peripherals;
use embassy_rp::pio::InterruptHandler as PioInterruptHandler;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

/// Global ADC instance protected by a mutex.
static ADC: Mutex<CriticalSectionRawMutex, Option<Adc<'static, AdcAsync>>> = Mutex::new(None);

/// Initializes the ADC peripheral.
///
/// Called once from main, before the supervisor starts.
pub fn init_adc(adc: ADC) {
    let adc = Adc::new(adc, Irqs, embassy_rp::adc::Config::default());
    critical_section::with(|_| {
        if let Ok(mut slot) = ADC.try_lock() {
            *slot = Some(adc);
        }
    });
}

/// Returns a reference to the protected ADC instance.
pub fn get_adc() -> &'static Mutex<CriticalSectionRawMutex, Option<Adc<'static, AdcAsync>>> {
    &ADC
}

assign_resources! {
    /// CYW43439 wireless chip, driven over PIO SPI
    wireless: WirelessResources {
        pwr_pin: PIN_23,
        cs_pin: PIN_25,
        dio_pin: PIN_24,
        clk_pin: PIN_29,
        pio: PIO0,
        dma: DMA_CH0,
    },
    /// DHT20 temperature/humidity sensor
    environment_sensor: EnvironmentSensorResources {
        i2c: I2C0,
        sda_pin: PIN_0,
        scl_pin: PIN_1,
    },
    /// On-die temperature sensor, read through the ADC
    internal_temperature: InternalTemperatureResources {
        temp_sensor: ADC_TEMP_SENSOR,
    },
    /// ADC block, shared through [`get_adc`]
    analog: AnalogResources {
        adc: ADC,
    },
    /// Hardware watchdog
    watchdog: WatchdogResources {
        watchdog: WATCHDOG,
    },
}

/// Hands every peripheral to its resource group
pub fn split(p: Peripherals) -> AssignedResources {
    split_resources!(p)
}

bind_interrupts!(pub struct Irqs {
    ADC_IRQ_FIFO => AdcInterruptHandler;
    PIO0_IRQ_0 => PioInterruptHandler<PIO0>;
    I2C0_IRQ => I2cInterruptHandler<I2C0>;
});

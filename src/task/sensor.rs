//! Sensor Source
//!
//! Environmental readings (temperature, humidity) and the microcontroller's
//! on-die temperature. The supervisor queries both once per publish cycle.
//!
//! # Internal Temperature
//! ```text
//! V = ADC * 3.3V / 4096
//! T = 27 - (V - 0.706) / 0.001721
//! ```
//! The on-die sensor is noisy, so a short burst of conversions is median
//! filtered before the conversion to degrees.

use embassy_time::Duration;
use moving_median::MovingMedian;

use crate::system::error::SensorError;

/// ADC reference voltage
const REF_VOLTAGE: f32 = 3.3;

/// ADC resolution (12-bit = 4096 steps)
const ADC_RANGE: f32 = 4096.0;

/// Sensor output at 27°C
const SENSOR_VOLTAGE_AT_27C: f32 = 0.706;

/// Sensor slope in V/°C
const SENSOR_SLOPE: f32 = 0.001721;

/// Conversions per internal temperature reading
pub const INTERNAL_TEMPERATURE_SAMPLES: usize = 9;

/// Pause between two conversions of a burst
pub const SAMPLE_SPACING: Duration = Duration::from_millis(2);

/// Readings published when no sensor is fitted
pub const SIMULATED_MEASUREMENTS: Measurements = Measurements {
    temperature: 21.0,
    humidity: 50.0,
};

/// Environmental reading, °C and %RH
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurements {
    pub temperature: f32,
    pub humidity: f32,
}

/// Readings the supervisor needs for one publish cycle
#[allow(async_fn_in_trait)]
pub trait SensorSource {
    /// Current ambient temperature and humidity
    async fn measurements(&mut self) -> Result<Measurements, SensorError>;

    /// Current microcontroller temperature in °C, one decimal
    async fn internal_temperature(&mut self) -> Result<f32, SensorError>;
}

/// Converts one raw ADC conversion of the temperature channel to °C
pub fn adc_to_celsius(raw: u16) -> f32 {
    let voltage = f32::from(raw) * REF_VOLTAGE / ADC_RANGE;
    27.0 - (voltage - SENSOR_VOLTAGE_AT_27C) / SENSOR_SLOPE
}

/// Median of a burst of raw conversions, in °C rounded to one decimal
///
/// Returns `None` for an empty burst.
pub fn median_celsius(samples: impl IntoIterator<Item = u16>) -> Option<f32> {
    let mut filter = MovingMedian::<f32, INTERNAL_TEMPERATURE_SAMPLES>::new();
    let mut count = 0;
    for raw in samples {
        filter.add_value(f32::from(raw));
        count += 1;
    }
    if count == 0 {
        return None;
    }
    // median of the raw codes, converted afterwards: the transfer is monotonic
    Some(round_tenths(adc_to_celsius(filter.median() as u16)))
}

/// Rounds to one decimal
pub fn round_tenths(value: f32) -> f32 {
    libm::roundf(value * 10.0) / 10.0
}

#[cfg(feature = "firmware")]
pub use board::BoardSensors;

#[cfg(feature = "firmware")]
mod board {
    use embassy_rp::adc::Channel;
    use embassy_rp::i2c::{self, I2c};
    use embassy_rp::peripherals::I2C0;
    use embassy_time::{Delay, Timer};
    use heapless::Vec;

    use super::{
        median_celsius, Measurements, SensorSource, INTERNAL_TEMPERATURE_SAMPLES, SAMPLE_SPACING,
        SIMULATED_MEASUREMENTS,
    };
    use crate::system::error::SensorError;
    use crate::system::resources::{
        get_adc, EnvironmentSensorResources, InternalTemperatureResources, Irqs,
    };
    use crate::task::dht20::Dht20;

    /// I2C bus speed for the DHT20 (standard mode)
    const I2C_FREQUENCY: u32 = 100_000;

    /// The board's sensors: DHT20 on I2C0 and the ADC temperature channel
    pub struct BoardSensors {
        /// `None` when the node runs without a sensor fitted
        dht20: Option<Dht20<I2c<'static, I2C0, i2c::Async>, Delay>>,
        temp_channel: Channel<'static>,
    }

    impl BoardSensors {
        /// Sets up the sensor bus and, if a sensor is in use, initializes it
        pub async fn new(
            env: EnvironmentSensorResources,
            internal: InternalTemperatureResources,
            sensor_in_use: bool,
        ) -> Result<Self, SensorError> {
            let dht20 = if sensor_in_use {
                let mut config = i2c::Config::default();
                config.frequency = I2C_FREQUENCY;
                let bus = I2c::new_async(env.i2c, env.scl_pin, env.sda_pin, Irqs, config);
                let mut sensor = Dht20::new(bus, Delay);
                sensor.init().await?;
                info!("DHT20 ready");
                Some(sensor)
            } else {
                info!("no environment sensor in use, publishing simulated readings");
                None
            };
            Ok(Self {
                dht20,
                temp_channel: Channel::new_temp_sensor(internal.temp_sensor),
            })
        }
    }

    impl SensorSource for BoardSensors {
        async fn measurements(&mut self) -> Result<Measurements, SensorError> {
            match self.dht20.as_mut() {
                Some(sensor) => sensor.read().await,
                None => Ok(SIMULATED_MEASUREMENTS),
            }
        }

        async fn internal_temperature(&mut self) -> Result<f32, SensorError> {
            let mut samples: Vec<u16, INTERNAL_TEMPERATURE_SAMPLES> = Vec::new();
            while !samples.is_full() {
                let raw = {
                    let mut adc_guard = get_adc().lock().await;
                    let adc = adc_guard.as_mut().ok_or(SensorError::Adc)?;
                    adc.read(&mut self.temp_channel).await.map_err(|_| SensorError::Adc)?
                };
                let _ = samples.push(raw);
                Timer::after(SAMPLE_SPACING).await;
            }
            median_celsius(samples).ok_or(SensorError::Adc)
        }
    }
}

//! DHT20 temperature/humidity sensor
//!
//! Async driver for the DHT20 (AHT20 core) on I2C.
//!
//! # Measurement Sequence
//! 1. Write the trigger command `AC 33 00`
//! 2. Wait 80ms for the conversion
//! 3. Read 7 bytes: status, 20-bit humidity, 20-bit temperature, CRC-8
//!
//! ```text
//! RH = raw_h / 2^20 * 100
//! T  = raw_t / 2^20 * 200 - 50
//! ```

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::system::error::SensorError;
use crate::task::sensor::Measurements;

/// Fixed bus address
pub const DHT20_ADDRESS: u8 = 0x38;

/// Trigger measurement command
const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];

/// Calibration init command, needed when the calibrated bit is not set
const CMD_INIT: [u8; 3] = [0xBE, 0x08, 0x00];

/// Status register read
const CMD_STATUS: u8 = 0x71;

/// Busy flag in the status byte
const STATUS_BUSY: u8 = 0x80;

/// Calibrated flag in the status byte
const STATUS_CALIBRATED: u8 = 0x08;

/// Power-up time before the first command
const POWER_UP_MS: u32 = 100;

/// Conversion time after a trigger
const CONVERSION_MS: u32 = 80;

/// Extra wait per busy poll
const BUSY_POLL_MS: u32 = 10;

/// Busy polls before giving up
const BUSY_POLLS: u8 = 3;

/// 2^20, full scale of the raw values
const FULL_SCALE: f32 = 1_048_576.0;

/// DHT20 on an async I2C bus
pub struct Dht20<I, D> {
    i2c: I,
    delay: D,
}

impl<I: I2c, D: DelayNs> Dht20<I, D> {
    pub fn new(i2c: I, delay: D) -> Self {
        Self { i2c, delay }
    }

    /// Waits for power-up and sends the calibration init if the sensor asks for it
    pub async fn init(&mut self) -> Result<(), SensorError> {
        self.delay.delay_ms(POWER_UP_MS).await;
        if self.status().await? & STATUS_CALIBRATED == 0 {
            debug!("DHT20 not calibrated, sending init");
            self.write(&CMD_INIT).await?;
            self.delay.delay_ms(BUSY_POLL_MS).await;
        }
        Ok(())
    }

    /// Triggers a conversion and reads the result
    pub async fn read(&mut self) -> Result<Measurements, SensorError> {
        self.write(&CMD_TRIGGER).await?;
        self.delay.delay_ms(CONVERSION_MS).await;

        let mut frame = [0u8; 7];
        for _ in 0..BUSY_POLLS {
            self.i2c
                .read(DHT20_ADDRESS, &mut frame)
                .await
                .map_err(|_| SensorError::Bus)?;
            if frame[0] & STATUS_BUSY == 0 {
                return decode(&frame);
            }
            self.delay.delay_ms(BUSY_POLL_MS).await;
        }
        Err(SensorError::Busy)
    }

    async fn status(&mut self) -> Result<u8, SensorError> {
        let mut status = [0u8; 1];
        self.i2c
            .write_read(DHT20_ADDRESS, &[CMD_STATUS], &mut status)
            .await
            .map_err(|_| SensorError::Bus)?;
        Ok(status[0])
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), SensorError> {
        self.i2c.write(DHT20_ADDRESS, bytes).await.map_err(|_| SensorError::Bus)
    }
}

/// Decodes a 7 byte measurement frame
pub fn decode(frame: &[u8; 7]) -> Result<Measurements, SensorError> {
    if crc8(&frame[..6]) != frame[6] {
        return Err(SensorError::Checksum);
    }
    let raw_humidity =
        (u32::from(frame[1]) << 12) | (u32::from(frame[2]) << 4) | (u32::from(frame[3]) >> 4);
    let raw_temperature =
        (u32::from(frame[3] & 0x0F) << 16) | (u32::from(frame[4]) << 8) | u32::from(frame[5]);
    Ok(Measurements {
        temperature: raw_temperature as f32 / FULL_SCALE * 200.0 - 50.0,
        humidity: raw_humidity as f32 / FULL_SCALE * 100.0,
    })
}

/// CRC-8, polynomial 0x31, init 0xFF
fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_async::i2c::{ErrorKind, ErrorType, Operation};
    use std::collections::VecDeque;

    /// 21.0°C / 50.0%RH, status idle and calibrated
    const FRAME_21C_50RH: [u8; 7] = [0x1C, 0x80, 0x00, 0x05, 0xAE, 0x14, 0x91];

    #[derive(Debug)]
    struct BusError;

    impl embedded_hal_async::i2c::Error for BusError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    /// Answers reads from a queue of frames and records writes
    #[derive(Default)]
    struct FakeBus {
        reads: VecDeque<Vec<u8>>,
        writes: Vec<Vec<u8>>,
        fail: bool,
    }

    impl ErrorType for FakeBus {
        type Error = BusError;
    }

    impl I2c for FakeBus {
        async fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            assert_eq!(address, DHT20_ADDRESS);
            if self.fail {
                return Err(BusError);
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.writes.push(bytes.to_vec()),
                    Operation::Read(buf) => {
                        let data = self.reads.pop_front().unwrap_or_default();
                        buf.copy_from_slice(&data[..buf.len()]);
                    }
                }
            }
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    #[test]
    fn decodes_a_known_frame() {
        let m = decode(&FRAME_21C_50RH).unwrap();
        assert!((m.temperature - 21.0).abs() < 0.01);
        assert!((m.humidity - 50.0).abs() < 0.01);
    }

    #[test]
    fn corrupted_frame_fails_the_checksum() {
        let mut frame = FRAME_21C_50RH;
        frame[4] ^= 0x01;
        assert_eq!(decode(&frame), Err(SensorError::Checksum));
    }

    #[test]
    fn read_triggers_then_reads() {
        let mut bus = FakeBus::default();
        bus.reads.push_back(FRAME_21C_50RH.to_vec());
        let mut sensor = Dht20::new(bus, NoDelay);
        let m = block_on(sensor.read()).unwrap();
        assert!((m.humidity - 50.0).abs() < 0.01);
        assert_eq!(sensor.i2c.writes, vec![CMD_TRIGGER.to_vec()]);
    }

    #[test]
    fn busy_sensor_is_polled_then_given_up() {
        let mut busy = FRAME_21C_50RH;
        busy[0] |= STATUS_BUSY;
        let mut bus = FakeBus::default();
        for _ in 0..BUSY_POLLS {
            bus.reads.push_back(busy.to_vec());
        }
        let mut sensor = Dht20::new(bus, NoDelay);
        assert_eq!(block_on(sensor.read()), Err(SensorError::Busy));

        let mut bus = FakeBus::default();
        bus.reads.push_back(busy.to_vec());
        bus.reads.push_back(FRAME_21C_50RH.to_vec());
        let mut sensor = Dht20::new(bus, NoDelay);
        assert!(block_on(sensor.read()).is_ok());
    }

    #[test]
    fn init_sends_calibration_only_when_needed() {
        let mut bus = FakeBus::default();
        bus.reads.push_back(vec![0x18]);
        let mut sensor = Dht20::new(bus, NoDelay);
        block_on(sensor.init()).unwrap();
        assert_eq!(sensor.i2c.writes, vec![vec![CMD_STATUS]]);

        let mut bus = FakeBus::default();
        bus.reads.push_back(vec![0x10]);
        let mut sensor = Dht20::new(bus, NoDelay);
        block_on(sensor.init()).unwrap();
        assert_eq!(sensor.i2c.writes, vec![vec![CMD_STATUS], CMD_INIT.to_vec()]);
    }

    #[test]
    fn bus_errors_surface_as_sensor_errors() {
        let bus = FakeBus { fail: true, ..FakeBus::default() };
        let mut sensor = Dht20::new(bus, NoDelay);
        assert_eq!(block_on(sensor.read()), Err(SensorError::Bus));
    }
}

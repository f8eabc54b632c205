//! ADXL345 three-axis accelerometer.
//!
//! Calibration writes its offsets into the device's own offset registers, so
//! every later read comes back already corrected.

use embedded_hal::delay::DelayNs;
use libm;

use super::{CalibrationError, SampleTriple, Sensor, SensorError};
use crate::utils::{
    controllers::{
        bus::{BusError, BusHandle, SharedBus},
        device::Device,
    },
    math::{decode, tilt},
};

/// Default I2C address (ALT ADDRESS pin low).
pub const ADXL345_ADDRESS: u8 = 0x53;
/// Value of `REG_DEVID` on a genuine part.
pub const DEVICE_ID: u8 = 0xE5;

pub const REG_DEVID: u8 = 0x00;
pub const REG_OFFSET_X: u8 = 0x1E;
pub const REG_OFFSET_Y: u8 = 0x1F;
pub const REG_OFFSET_Z: u8 = 0x20;
pub const REG_BW_RATE: u8 = 0x2C;
pub const REG_POWER_CTL: u8 = 0x2D;
pub const REG_DATA_FORMAT: u8 = 0x31;
pub const REG_DATA_X_L: u8 = 0x32;
pub const REG_DATA_X_H: u8 = 0x33;
pub const REG_DATA_Y_L: u8 = 0x34;
pub const REG_DATA_Y_H: u8 = 0x35;
pub const REG_DATA_Z_L: u8 = 0x36;
pub const REG_DATA_Z_H: u8 = 0x37;
pub const REG_FIFO_CTL: u8 = 0x38;

pub const BITS_PWR_MEASURE: u8 = 1 << 3;
pub const BITS_DATA_FULL_RES: u8 = 1 << 3;
pub const FIFO_STREAM: u8 = 0b10 << 6;

/// g per LSB in full resolution (and in the ±2 g fixed range).
pub const BASE_SCALE: f32 = 0.0039;
/// Raw counts represented by one LSB of an offset register.
pub const OFFSET_LSB_COUNTS: f64 = 4.0;
/// Pause between calibration samples (ms).
pub const CALIBRATION_PERIOD_MS: u32 = 11;

/// Measurement range, encoded as the DATA_FORMAT range bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Range {
    G2 = 0x00,
    G4 = 0x01,
    G8 = 0x02,
    G16 = 0x03,
}

/// Output data rate, encoded as the BW_RATE rate bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataRate {
    Hz100 = 0x0A,
    Hz200 = 0x0B,
    Hz400 = 0x0C,
    Hz800 = 0x0D,
    Hz1600 = 0x0E,
    Hz3200 = 0x0F,
}

#[derive(Debug, Clone, Copy)]
pub struct Adxl345Config {
    pub range: Range,
    pub data_rate: DataRate,
    /// Keep 3.9 mg/LSB at every range instead of 10-bit fixed resolution.
    pub full_resolution: bool,
}

impl Default for Adxl345Config {
    fn default() -> Self {
        Adxl345Config {
            range: Range::G4,
            data_rate: DataRate::Hz100,
            full_resolution: true,
        }
    }
}

impl Adxl345Config {
    fn data_format(&self) -> u8 {
        let res = if self.full_resolution {
            BITS_DATA_FULL_RES
        } else {
            0
        };
        res | self.range as u8
    }

    /// Scale multiplier relative to `BASE_SCALE`.
    pub fn range_multiplier(&self) -> f32 {
        if self.full_resolution {
            1.0
        } else {
            (1u8 << self.range as u8) as f32
        }
    }
}

pub struct Adxl345<B> {
    device: Device<B>,
    config: Adxl345Config,
    offsets: SampleTriple<i8>,
}

impl<B: BusHandle> Adxl345<B> {
    pub fn new(
        bus: SharedBus<B>,
        address: Option<u8>,
        config: Option<Adxl345Config>,
    ) -> Self {
        Adxl345 {
            device: Device::new(bus, address.unwrap_or(ADXL345_ADDRESS), "ADXL345"),
            config: config.unwrap_or_default(),
            offsets: SampleTriple::default(),
        }
    }

    pub fn address(&self) -> u8 {
        self.device.address()
    }

    pub fn config(&self) -> &Adxl345Config {
        &self.config
    }

    /// Offsets written by the last calibration.
    pub fn offsets(&self) -> SampleTriple<i8> {
        self.offsets
    }

    pub fn device_id(&mut self) -> Result<u8, SensorError<B::Error>> {
        Ok(self.device.transaction(|bus| bus.read_register(REG_DEVID))?)
    }

    /// Read one signed axis from its high and low data registers.
    pub fn read_axis(
        &mut self,
        high: u8,
        low: u8,
    ) -> Result<i16, SensorError<B::Error>> {
        Ok(self
            .device
            .transaction(|bus| read_axis(bus, high, low))?)
    }

    /// Read one sample and convert it to g.
    pub fn read_sample_g(&mut self) -> Result<SampleTriple<f32>, SensorError<B::Error>> {
        let raw = self.read_sample()?;
        Ok(raw.map(|v| self.to_physical(v)))
    }

    /// Read one sample and convert it to tilt angles in degrees.
    pub fn read_tilt(&mut self) -> Result<(f32, f32, f32), SensorError<B::Error>> {
        let g = self.read_sample_g()?;
        Ok(tilt::tilt_degrees(g.x, g.y, g.z))
    }

    fn write_init(
        &self,
        bus: &mut B,
    ) -> Result<(), BusError<B::Error>> {
        // measurement enable last
        bus.write_register(REG_DATA_FORMAT, self.config.data_format())?;
        bus.write_register(REG_FIFO_CTL, FIFO_STREAM)?;
        bus.write_register(REG_BW_RATE, self.config.data_rate as u8)?;
        bus.write_register(REG_POWER_CTL, BITS_PWR_MEASURE)
    }
}

fn read_axis<B: BusHandle>(
    bus: &mut B,
    high: u8,
    low: u8,
) -> Result<i16, BusError<B::Error>> {
    let h = bus.read_register(high)?;
    let l = bus.read_register(low)?;
    Ok(decode::sign_extend(h, l))
}

fn write_offsets<B: BusHandle>(
    bus: &mut B,
    offsets: SampleTriple<i8>,
) -> Result<(), BusError<B::Error>> {
    bus.write_register(REG_OFFSET_X, offsets.x as u8)?;
    bus.write_register(REG_OFFSET_Y, offsets.y as u8)?;
    bus.write_register(REG_OFFSET_Z, offsets.z as u8)
}

/// Offset register value that cancels a measured `mean`.
///
/// The target is absolute zero: the result is `round((0 - mean) / 4)`,
/// saturated to the register's signed 8-bit range.
pub fn offset_for_mean(mean: f64) -> i8 {
    let steps = libm::round((0.0 - mean) / OFFSET_LSB_COUNTS);
    steps.clamp(f64::from(i8::MIN), f64::from(i8::MAX)) as i8
}

impl<B: BusHandle> Sensor for Adxl345<B> {
    type Raw = i16;
    type Error = B::Error;

    fn name(&self) -> &'static str {
        self.device.name()
    }

    fn init(&mut self) -> Result<(), SensorError<B::Error>> {
        self.device.transaction(|bus| self.write_init(bus))?;
        tracing::debug!(address = self.device.address(), "ADXL345 initialized");
        Ok(())
    }

    fn read_sample(&mut self) -> Result<SampleTriple<i16>, SensorError<B::Error>> {
        Ok(self.device.transaction(|bus| {
            let x = read_axis(bus, REG_DATA_X_H, REG_DATA_X_L)?;
            let y = read_axis(bus, REG_DATA_Y_H, REG_DATA_Y_L)?;
            let z = read_axis(bus, REG_DATA_Z_H, REG_DATA_Z_L)?;
            Ok(SampleTriple::new(x, y, z))
        })?)
    }

    fn calibrate<D: DelayNs>(
        &mut self,
        sample_count: u32,
        delay: &mut D,
    ) -> Result<(), SensorError<B::Error>> {
        if sample_count == 0 {
            return Err(CalibrationError::ZeroSamples.into());
        }

        tracing::info!(samples = sample_count, "Calibrating ADXL345");
        self.device.transaction(|bus| {
            bus.write_register(REG_POWER_CTL, 0x00)?;
            write_offsets(bus, SampleTriple::default())?;
            self.write_init(bus)
        })?;

        let mut sum = SampleTriple::<i64>::default();
        for _ in 0..sample_count {
            let s = self.read_sample()?;
            sum.x += i64::from(s.x);
            sum.y += i64::from(s.y);
            sum.z += i64::from(s.z);
            delay.delay_ms(CALIBRATION_PERIOD_MS);
        }

        let offsets = sum.map(|total| offset_for_mean(decode::mean(total, sample_count)));
        self.device.transaction(|bus| {
            bus.write_register(REG_POWER_CTL, 0x00)?;
            write_offsets(bus, offsets)?;
            bus.write_register(REG_POWER_CTL, BITS_PWR_MEASURE)
        })?;
        self.offsets = offsets;

        tracing::info!(?offsets, "Finished ADXL345 calibration");
        Ok(())
    }

    fn to_physical(
        &self,
        value: i16,
    ) -> f32 {
        f32::from(value) * BASE_SCALE * self.config.range_multiplier()
    }

    fn stop(&mut self) -> Result<(), SensorError<B::Error>> {
        Ok(self
            .device
            .transaction(|bus| bus.write_register(REG_POWER_CTL, 0x00))?)
    }
}

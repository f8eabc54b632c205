//! ITG3200 three-axis gyroscope.
//!
//! The part has no offset registers. Calibration keeps the per-axis bias in
//! host memory and every read subtracts it with 16-bit wraparound.

use embedded_hal::delay::DelayNs;

use super::{CalibrationError, SampleTriple, Sensor, SensorError};
use crate::utils::{
    controllers::{
        bus::{BusError, BusHandle, SharedBus},
        device::Device,
    },
    math::decode,
};

/// Default I2C address (AD0 pulled low).
pub const ITG3200_ADDR: u8 = 0x68;
/// LSB per °/s at full scale.
pub const ITG3200_SENSITIVITY: f32 = 14.375;

pub const REG_WHO_AM_I: u8 = 0x00;
pub const REG_SMPLRT_DIV: u8 = 0x15;
pub const REG_DLPF_FS: u8 = 0x16;
pub const REG_INT_CFG: u8 = 0x17;
pub const REG_TEMP_OUT_H: u8 = 0x1B;
pub const REG_TEMP_OUT_L: u8 = 0x1C;
pub const REG_GYRO_XOUT_H: u8 = 0x1D;
pub const REG_GYRO_XOUT_L: u8 = 0x1E;
pub const REG_GYRO_YOUT_H: u8 = 0x1F;
pub const REG_GYRO_YOUT_L: u8 = 0x20;
pub const REG_GYRO_ZOUT_H: u8 = 0x21;
pub const REG_GYRO_ZOUT_L: u8 = 0x22;
pub const REG_PWRMGM: u8 = 0x3E;

/// Full-scale select, the only documented setting (±2000 °/s).
pub const DLPF_FS_SEL: u8 = 3 << 3;
pub const PWR_SLEEP: u8 = 0x20;
pub const DEFAULT_SAMPLE_RATE_DIV: u8 = 0x09;
/// Pause between calibration samples (ms).
pub const CALIBRATION_PERIOD_MS: u32 = 10;

/// Digital low-pass filter bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LowPass {
    Hz256 = 0x00,
    Hz188 = 0x01,
    Hz98 = 0x02,
    Hz42 = 0x03,
    Hz20 = 0x04,
    Hz10 = 0x05,
    Hz5 = 0x06,
}

#[derive(Debug, Clone, Copy)]
pub struct Itg3200Config {
    pub sample_rate_div: u8,
    pub low_pass: LowPass,
}

impl Default for Itg3200Config {
    fn default() -> Self {
        Itg3200Config {
            sample_rate_div: DEFAULT_SAMPLE_RATE_DIV,
            low_pass: LowPass::Hz188,
        }
    }
}

pub struct Itg3200<B> {
    device: Device<B>,
    config: Itg3200Config,
    offsets: SampleTriple<u16>,
}

impl<B: BusHandle> Itg3200<B> {
    pub fn new(
        bus: SharedBus<B>,
        address: Option<u8>,
        config: Option<Itg3200Config>,
    ) -> Self {
        Itg3200 {
            device: Device::new(bus, address.unwrap_or(ITG3200_ADDR), "ITG3200"),
            config: config.unwrap_or_default(),
            offsets: SampleTriple::default(),
        }
    }

    pub fn address(&self) -> u8 {
        self.device.address()
    }

    /// Host-held offsets from the last calibration.
    pub fn offsets(&self) -> SampleTriple<u16> {
        self.offsets
    }

    pub fn who_am_i(&mut self) -> Result<u8, SensorError<B::Error>> {
        Ok(self
            .device
            .transaction(|bus| bus.read_register(REG_WHO_AM_I))?)
    }

    /// Read one axis and subtract `offset`.
    pub fn read_axis(
        &mut self,
        high: u8,
        low: u8,
        offset: u16,
    ) -> Result<u16, SensorError<B::Error>> {
        Ok(self
            .device
            .transaction(|bus| read_axis(bus, high, low, offset))?)
    }

    /// Raw die temperature word.
    pub fn read_temp(&mut self) -> Result<u16, SensorError<B::Error>> {
        self.read_axis(REG_TEMP_OUT_H, REG_TEMP_OUT_L, 0)
    }

    /// Read one sample and convert it to °/s.
    pub fn read_sample_deg(&mut self) -> Result<SampleTriple<f32>, SensorError<B::Error>> {
        let raw = self.read_sample()?;
        Ok(raw.map(to_angle))
    }

    fn read_with(
        &self,
        offsets: SampleTriple<u16>,
    ) -> Result<SampleTriple<u16>, BusError<B::Error>> {
        self.device.transaction(|bus| {
            let x = read_axis(bus, REG_GYRO_XOUT_H, REG_GYRO_XOUT_L, offsets.x)?;
            let y = read_axis(bus, REG_GYRO_YOUT_H, REG_GYRO_YOUT_L, offsets.y)?;
            let z = read_axis(bus, REG_GYRO_ZOUT_H, REG_GYRO_ZOUT_L, offsets.z)?;
            Ok(SampleTriple::new(x, y, z))
        })
    }
}

fn read_axis<B: BusHandle>(
    bus: &mut B,
    high: u8,
    low: u8,
    offset: u16,
) -> Result<u16, BusError<B::Error>> {
    let h = bus.read_register(high)?;
    let l = bus.read_register(low)?;
    Ok(decode::unsigned_with_offset(h, l, offset))
}

/// Angular rate in °/s of an offset-corrected word.
///
/// The word is two's complement on the wire, so it is reinterpreted as signed.
pub fn to_angle(value: u16) -> f32 {
    f32::from(value as i16) / ITG3200_SENSITIVITY
}

/// Die temperature in °C from a raw temperature word.
pub fn temp_to_celsius(raw: u16) -> f32 {
    35.0 + (f32::from(raw as i16) + 13200.0) / 280.0
}

impl<B: BusHandle> Sensor for Itg3200<B> {
    type Raw = u16;
    type Error = B::Error;

    fn name(&self) -> &'static str {
        self.device.name()
    }

    fn init(&mut self) -> Result<(), SensorError<B::Error>> {
        let dlpf = DLPF_FS_SEL | self.config.low_pass as u8;
        let div = self.config.sample_rate_div;
        self.device.transaction(|bus| {
            bus.write_register(REG_PWRMGM, 0x00)?;
            bus.write_register(REG_SMPLRT_DIV, div)?;
            bus.write_register(REG_DLPF_FS, dlpf)?;
            bus.write_register(REG_INT_CFG, 0x00)
        })?;
        tracing::debug!(address = self.device.address(), "ITG3200 initialized");
        Ok(())
    }

    fn read_sample(&mut self) -> Result<SampleTriple<u16>, SensorError<B::Error>> {
        Ok(self.read_with(self.offsets)?)
    }

    fn calibrate<D: DelayNs>(
        &mut self,
        sample_count: u32,
        delay: &mut D,
    ) -> Result<(), SensorError<B::Error>> {
        if sample_count == 0 {
            return Err(CalibrationError::ZeroSamples.into());
        }

        tracing::info!(samples = sample_count, "Calibrating ITG3200");
        self.init()?;

        // words are two's complement, so a bias straddling zero must average as signed
        let mut sum = SampleTriple::<i64>::default();
        for _ in 0..sample_count {
            let s = self.read_with(SampleTriple::default())?;
            sum.x += i64::from(s.x as i16);
            sum.y += i64::from(s.y as i16);
            sum.z += i64::from(s.z as i16);
            delay.delay_ms(CALIBRATION_PERIOD_MS);
        }

        let count = i64::from(sample_count);
        self.offsets = sum.map(|total| (total / count) as i16 as u16);

        tracing::info!(offsets = ?self.offsets, "Finished ITG3200 calibration");
        Ok(())
    }

    fn to_physical(
        &self,
        value: u16,
    ) -> f32 {
        to_angle(value)
    }

    fn stop(&mut self) -> Result<(), SensorError<B::Error>> {
        Ok(self
            .device
            .transaction(|bus| bus.write_register(REG_PWRMGM, PWR_SLEEP))?)
    }
}

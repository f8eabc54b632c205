//! Inertial sensors on the shared I2C bus.
//!
//! - `adxl345`: three-axis accelerometer with hardware offset registers
//! - `itg3200`: three-axis gyroscope with host-held offsets
//!
//! Both drivers implement [`Sensor`]. [`SamplePoller`] reads a sensor on demand
//! and hands every decoded sample to the subscribed [`SampleSink`]s.

pub mod adxl345;
pub mod itg3200;

use core::fmt;

use embedded_hal::delay::DelayNs;
use serde::Serialize;

use crate::utils::controllers::bus::BusError;

pub use adxl345::{Adxl345, Adxl345Config};
pub use itg3200::{Itg3200, Itg3200Config};

/// One `(x, y, z)` reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SampleTriple<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> SampleTriple<T> {
    pub fn new(
        x: T,
        y: T,
        z: T,
    ) -> Self {
        SampleTriple { x, y, z }
    }

    /// Apply `f` to every axis.
    pub fn map<U>(
        self,
        f: impl Fn(T) -> U,
    ) -> SampleTriple<U> {
        SampleTriple {
            x: f(self.x),
            y: f(self.y),
            z: f(self.z),
        }
    }
}

/// Invalid calibration parameters. Raised before any bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    /// A mean over zero samples is undefined.
    ZeroSamples,
}

impl fmt::Display for CalibrationError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            CalibrationError::ZeroSamples => write!(f, "calibration needs at least one sample"),
        }
    }
}

impl std::error::Error for CalibrationError {}

/// Errors that can occur when driving a sensor.
#[derive(Debug)]
pub enum SensorError<E: fmt::Debug> {
    Bus(BusError<E>),
    Calibration(CalibrationError),
}

impl<E: fmt::Debug> From<BusError<E>> for SensorError<E> {
    fn from(e: BusError<E>) -> Self {
        SensorError::Bus(e)
    }
}

impl<E: fmt::Debug> From<CalibrationError> for SensorError<E> {
    fn from(e: CalibrationError) -> Self {
        SensorError::Calibration(e)
    }
}

impl<E: fmt::Debug> fmt::Display for SensorError<E> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            SensorError::Bus(e) => write!(f, "{}", e),
            SensorError::Calibration(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for SensorError<E> {}

/// Capabilities shared by the inertial sensor drivers.
pub trait Sensor {
    /// Raw per-axis sample type.
    type Raw: Copy + fmt::Debug;
    /// Transport error of the underlying bus.
    type Error: fmt::Debug;

    fn name(&self) -> &'static str;

    /// Bring the device into its default measuring configuration.
    fn init(&mut self) -> Result<(), SensorError<Self::Error>>;

    /// Read one raw `(x, y, z)` sample in a single bus transaction.
    fn read_sample(&mut self) -> Result<SampleTriple<Self::Raw>, SensorError<Self::Error>>;

    /// Recompute the offset calibration from `sample_count` samples.
    fn calibrate<D: DelayNs>(
        &mut self,
        sample_count: u32,
        delay: &mut D,
    ) -> Result<(), SensorError<Self::Error>>;

    /// Convert a raw value to physical units (g or °/s).
    fn to_physical(
        &self,
        value: Self::Raw,
    ) -> f32;

    /// Put the device back into standby.
    fn stop(&mut self) -> Result<(), SensorError<Self::Error>>;
}

/// Which representation of a sample the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    Raw,
    #[default]
    Physical,
    All,
}

/// A decoded sample in both representations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading<T> {
    pub raw: SampleTriple<T>,
    pub physical: SampleTriple<f32>,
}

/// Receiver of decoded samples and calibration confirmations.
pub trait SampleSink<T> {
    fn on_sample(
        &mut self,
        sensor: &'static str,
        mode: ReadMode,
        reading: &Reading<T>,
    );

    fn on_calibrated(
        &mut self,
        _sensor: &'static str,
    ) {
    }
}

/// Polls a sensor and fans samples out to its subscribers.
pub struct SamplePoller<T> {
    mode: ReadMode,
    sinks: Vec<Box<dyn SampleSink<T> + Send>>,
}

impl<T: Copy + fmt::Debug> SamplePoller<T> {
    pub fn new(mode: ReadMode) -> Self {
        SamplePoller {
            mode,
            sinks: Vec::new(),
        }
    }

    pub fn subscribe(
        &mut self,
        sink: Box<dyn SampleSink<T> + Send>,
    ) {
        self.sinks.push(sink);
    }

    pub fn subscribers(&self) -> usize {
        self.sinks.len()
    }

    /// Calibrate `sensor` and confirm to every subscriber.
    pub fn calibrate<S, D>(
        &mut self,
        sensor: &mut S,
        sample_count: u32,
        delay: &mut D,
    ) -> Result<(), SensorError<S::Error>>
    where
        S: Sensor<Raw = T>,
        D: DelayNs,
    {
        sensor.calibrate(sample_count, delay)?;
        for sink in self.sinks.iter_mut() {
            sink.on_calibrated(sensor.name());
        }
        Ok(())
    }

    /// Read `num_samples` samples (0 = until an error) spaced `interval_us` apart.
    ///
    /// Returns the number of samples delivered.
    pub fn poll<S, D>(
        &mut self,
        sensor: &mut S,
        num_samples: u64,
        interval_us: u32,
        delay: &mut D,
    ) -> Result<u64, SensorError<S::Error>>
    where
        S: Sensor<Raw = T>,
        D: DelayNs,
    {
        let mut delivered = 0u64;
        while num_samples == 0 || delivered < num_samples {
            let raw = sensor.read_sample()?;
            let reading = Reading {
                raw,
                physical: raw.map(|v| sensor.to_physical(v)),
            };
            for sink in self.sinks.iter_mut() {
                sink.on_sample(sensor.name(), self.mode, &reading);
            }
            delivered += 1;
            if interval_us > 0 {
                delay.delay_us(interval_us);
            }
        }
        Ok(delivered)
    }
}

//! Utility re-exports for the quadcopter.
//!
//! - `connection`: operator command shell
//! - `controllers`: shared I2C bus, ESC driver, motor registry
//! - `math`: raw sample decoding and tilt estimation
//! - `sensors`: ADXL345 accelerometer and ITG3200 gyroscope drivers

pub mod connection;
pub mod controllers;
pub mod math;
pub mod sensors;

pub use connection::shell::{CommandShell, Outcome, ShellCommand};
pub use controllers::Quadcopter;
pub use sensors::{ReadMode, SamplePoller, SampleSink, SampleTriple, Sensor};

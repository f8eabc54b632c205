//! Math utilities for the quadcopter.
//!
//! Raw register decoding, gravity based tilt estimation and attitude fusion
//! of the accelerometer and gyroscope.

pub mod decode;
pub mod fusion;
pub mod tilt;

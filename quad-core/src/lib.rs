//! Core drivers and runtime for an I2C quadcopter: ADXL345 and ITG3200 inertial
//! sensors plus Afro ESC motor control loops on one shared bus.
//!
//! For a runnable host program, see `quad-app/quad-shell`.

pub mod utils;

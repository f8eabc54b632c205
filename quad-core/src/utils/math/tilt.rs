//! Static tilt estimation from a gravity vector.
//!
//! With the airframe at rest the accelerometer measures gravity only, so the
//! pitch and roll angles follow from the ratios of the three axes. Yaw is not
//! observable from gravity and is reported as zero.
//!
//! # Example
//! ```rust
//! use quad_core::utils::math::tilt::tilt_degrees;
//! let (x, y, z) = tilt_degrees(0.0, 0.0, 1.0);
//! assert!(x.abs() < 1e-3 && y.abs() < 1e-3 && z == 0.0);
//! ```
use core::f32::consts::PI;
use libm;

/// Convert an acceleration triple in g to tilt angles in degrees.
///
/// # Returns
///
/// `(x_deg, y_deg, 0.0)` where `x_deg = atan2(x, sqrt(y² + z²))` and
/// `y_deg = atan2(y, sqrt(x² + z²))`.
pub fn tilt_degrees(
    x_g: f32,
    y_g: f32,
    z_g: f32,
) -> (f32, f32, f32) {
    let x = libm::atan2f(x_g, libm::sqrtf(y_g * y_g + z_g * z_g));
    let y = libm::atan2f(y_g, libm::sqrtf(x_g * x_g + z_g * z_g));
    (to_degrees(x), to_degrees(y), 0.0)
}

fn to_degrees(rad: f32) -> f32 {
    rad * 180.0 / PI
}

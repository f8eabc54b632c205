//! Attitude estimation from the accelerometer and gyroscope pair.
//!
//! [`ComplementaryFilter`] integrates gyro rates and pulls the result towards
//! the gravity tilt with a small weight. [`MadgwickAhrs`] runs the gradient
//! descent orientation filter over the same inputs and keeps a quaternion.
//!
//! # Example
//! ```rust
//! use quad_core::utils::math::fusion::MadgwickAhrs;
//! use quad_core::utils::sensors::SampleTriple;
//!
//! let mut ahrs = MadgwickAhrs::new(100.0);
//! ahrs.update_imu(SampleTriple::new(0.0, 0.0, 1.0), SampleTriple::default());
//! let (roll, pitch, yaw) = ahrs.orientation();
//! assert!(roll.abs() < 1e-3 && pitch.abs() < 1e-3 && yaw.abs() < 1e-3);
//! ```
use core::f32::consts::PI;
use libm;
use tracing::trace;

use crate::utils::{
    controllers::BusHandle,
    math::tilt,
    sensors::{Adxl345, Itg3200, SampleTriple, SensorError},
};

/// Share of the accelerometer tilt in every complementary update.
pub const ACCEL_WEIGHT: f32 = 0.02;
/// Madgwick gain.
pub const DEFAULT_BETA: f32 = 0.1;

/// Per-axis complementary filter in degrees.
///
/// Roll and pitch follow `(1 - w) * (angle + rate * dt) + w * tilt`. Gravity
/// carries no heading, so yaw is integrated from the gyro alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplementaryFilter {
    weight: f32,
    angles: SampleTriple<f32>,
    primed: bool,
}

impl Default for ComplementaryFilter {
    fn default() -> Self {
        Self::new(ACCEL_WEIGHT)
    }
}

impl ComplementaryFilter {
    /// `weight` is clamped to `0.0..=1.0`.
    pub fn new(weight: f32) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
            angles: SampleTriple::default(),
            primed: false,
        }
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Current angle estimate in degrees.
    pub fn angles(&self) -> SampleTriple<f32> {
        self.angles
    }

    /// Forget the estimate; the next update starts from its tilt.
    pub fn reset(&mut self) {
        self.angles = SampleTriple::default();
        self.primed = false;
    }

    /// Fold one reading into the estimate.
    ///
    /// `rates` in °/s, `tilt` in degrees, `dt_s` the time since the last call.
    pub fn update(
        &mut self,
        rates: SampleTriple<f32>,
        tilt: SampleTriple<f32>,
        dt_s: f32,
    ) -> SampleTriple<f32> {
        if !self.primed {
            self.angles = SampleTriple::new(tilt.x, tilt.y, 0.0);
            self.primed = true;
            return self.angles;
        }
        let w = self.weight;
        let blend = |angle: f32, rate: f32, target: f32| {
            (1.0 - w) * (angle + rate * dt_s) + w * target
        };
        self.angles = SampleTriple::new(
            blend(self.angles.x, rates.x, tilt.x),
            blend(self.angles.y, rates.y, tilt.y),
            self.angles.z + rates.z * dt_s,
        );
        self.angles
    }
}

/// Gradient descent orientation filter for a 6-axis IMU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MadgwickAhrs {
    sample_freq: f32,
    beta: f32,
    q: [f32; 4],
}

impl MadgwickAhrs {
    /// Filter for updates arriving at `sample_freq` Hz.
    pub fn new(sample_freq: f32) -> Self {
        Self::with_beta(sample_freq, DEFAULT_BETA)
    }

    pub fn with_beta(
        sample_freq: f32,
        beta: f32,
    ) -> Self {
        Self {
            sample_freq,
            beta,
            q: [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Unit quaternion `(w, x, y, z)`.
    pub fn quaternion(&self) -> [f32; 4] {
        self.q
    }

    /// Fold one accelerometer (any unit) and gyroscope (°/s) reading.
    ///
    /// An all-zero accelerometer vector skips the gravity correction and
    /// integrates the gyro only.
    pub fn update_imu(
        &mut self,
        accel: SampleTriple<f32>,
        gyro_dps: SampleTriple<f32>,
    ) {
        let (gx, gy, gz) = (
            gyro_dps.x * PI / 180.0,
            gyro_dps.y * PI / 180.0,
            gyro_dps.z * PI / 180.0,
        );
        let [q0, q1, q2, q3] = self.q;

        // rate of change from the gyro
        let mut dq = [
            0.5 * (-q1 * gx - q2 * gy - q3 * gz),
            0.5 * (q0 * gx + q2 * gz - q3 * gy),
            0.5 * (q0 * gy - q1 * gz + q3 * gx),
            0.5 * (q0 * gz + q1 * gy - q2 * gx),
        ];

        let a_norm = norm(&[accel.x, accel.y, accel.z]);
        if a_norm > 0.0 {
            let (ax, ay, az) = (accel.x / a_norm, accel.y / a_norm, accel.z / a_norm);
            let (q0q0, q1q1, q2q2, q3q3) = (q0 * q0, q1 * q1, q2 * q2, q3 * q3);

            let s = [
                4.0 * q0 * q2q2 + 2.0 * q2 * ax + 4.0 * q0 * q1q1 - 2.0 * q1 * ay,
                4.0 * q1 * q3q3 - 2.0 * q3 * ax + 4.0 * q0q0 * q1 - 2.0 * q0 * ay - 4.0 * q1
                    + 8.0 * q1 * q1q1
                    + 8.0 * q1 * q2q2
                    + 4.0 * q1 * az,
                4.0 * q0q0 * q2 + 2.0 * q0 * ax + 4.0 * q2 * q3q3 - 2.0 * q3 * ay - 4.0 * q2
                    + 8.0 * q2 * q1q1
                    + 8.0 * q2 * q2q2
                    + 4.0 * q2 * az,
                4.0 * q1q1 * q3 - 2.0 * q1 * ax + 4.0 * q2q2 * q3 - 2.0 * q2 * ay,
            ];
            let s_norm = norm(&s);
            if s_norm > 0.0 {
                for (d, s) in dq.iter_mut().zip(s) {
                    *d -= self.beta * s / s_norm;
                }
            }
        }

        let mut q = [q0, q1, q2, q3];
        for (q, d) in q.iter_mut().zip(dq) {
            *q += d / self.sample_freq;
        }
        let q_norm = norm(&q);
        if q_norm > 0.0 {
            self.q = q.map(|v| v / q_norm);
        }
    }

    /// `(roll, pitch, yaw)` in degrees. Pitch saturates at ±90.
    pub fn orientation(&self) -> (f32, f32, f32) {
        let [q0, q1, q2, q3] = self.q;
        let roll = libm::atan2f(2.0 * (q0 * q1 + q2 * q3), 1.0 - 2.0 * (q1 * q1 + q2 * q2));
        let pitch = libm::asinf((2.0 * (q0 * q2 - q3 * q1)).clamp(-1.0, 1.0));
        let yaw = libm::atan2f(2.0 * (q0 * q3 + q1 * q2), 1.0 - 2.0 * (q2 * q2 + q3 * q3));
        (to_degrees(roll), to_degrees(pitch), to_degrees(yaw))
    }
}

/// Accelerometer and gyroscope read as one IMU and blended into angles.
pub struct SensorFusion<B: BusHandle> {
    accel: Adxl345<B>,
    gyro: Itg3200<B>,
    filter: ComplementaryFilter,
}

impl<B: BusHandle> SensorFusion<B> {
    pub fn new(
        accel: Adxl345<B>,
        gyro: Itg3200<B>,
    ) -> Self {
        Self::with_filter(accel, gyro, ComplementaryFilter::default())
    }

    pub fn with_filter(
        accel: Adxl345<B>,
        gyro: Itg3200<B>,
        filter: ComplementaryFilter,
    ) -> Self {
        Self {
            accel,
            gyro,
            filter,
        }
    }

    pub fn accel_mut(&mut self) -> &mut Adxl345<B> {
        &mut self.accel
    }

    pub fn gyro_mut(&mut self) -> &mut Itg3200<B> {
        &mut self.gyro
    }

    pub fn angles(&self) -> SampleTriple<f32> {
        self.filter.angles()
    }

    /// One paired reading: acceleration in g and rates in °/s.
    pub fn read_sample(
        &mut self,
    ) -> Result<(SampleTriple<f32>, SampleTriple<f32>), SensorError<B::Error>> {
        let accel = self.accel.read_sample_g()?;
        let gyro = self.gyro.read_sample_deg()?;
        Ok((accel, gyro))
    }

    /// Read both sensors and advance the filter by `dt_s` seconds.
    pub fn update(
        &mut self,
        dt_s: f32,
    ) -> Result<SampleTriple<f32>, SensorError<B::Error>> {
        let (accel, rates) = self.read_sample()?;
        let (x, y, z) = tilt::tilt_degrees(accel.x, accel.y, accel.z);
        let angles = self.filter.update(rates, SampleTriple::new(x, y, z), dt_s);
        trace!(x = angles.x, y = angles.y, z = angles.z, "fused");
        Ok(angles)
    }

    pub fn into_parts(self) -> (Adxl345<B>, Itg3200<B>) {
        (self.accel, self.gyro)
    }
}

fn norm(v: &[f32]) -> f32 {
    libm::sqrtf(v.iter().map(|c| c * c).sum())
}

fn to_degrees(rad: f32) -> f32 {
    rad * 180.0 / PI
}

use std::f64::consts::PI;

use nalgebra::{Rotation3, Vector3};

use crate::config::PdrConfig;
use crate::error::PdrError;
use crate::pdr::step_detection::estimate_sample_rate;
use crate::types::{AccelData, Attitude, GyroData, GyroUnit};

/// Wrap an angle to (−π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        PI
    } else {
        wrapped
    }
}

/// Settle `Auto` into a concrete unit by looking at the batch magnitude.
pub fn resolve_gyro_unit(gyro: &[GyroData], unit: GyroUnit, deg_threshold: f64) -> GyroUnit {
    match unit {
        GyroUnit::Auto => {
            let peak = gyro.iter().map(|g| g.max_abs_component()).fold(0.0, f64::max);
            if peak > deg_threshold {
                log::debug!("Gyro peak {:.1} > {:.1}, treating as deg/s", peak, deg_threshold);
                GyroUnit::DegPerSec
            } else {
                GyroUnit::RadPerSec
            }
        }
        other => other,
    }
}

/// Roll and pitch from the mean accelerometer over the rest window; yaw is 0.
pub fn initial_attitude(accel: &[AccelData], rest_samples: usize) -> Attitude {
    let count = rest_samples.clamp(1, accel.len().max(1));
    let window = &accel[..count.min(accel.len())];
    if window.is_empty() {
        return Attitude::identity();
    }

    let sum = window
        .iter()
        .fold(Vector3::zeros(), |acc, a| acc + Vector3::new(a.x, a.y, a.z));
    let mean = sum / window.len() as f64;

    let roll = mean.y.atan2(mean.z);
    let pitch = -mean.x.atan2((mean.y * mean.y + mean.z * mean.z).sqrt());
    // Rz(0) · Ry(pitch) · Rx(roll)
    Rotation3::from_euler_angles(roll, pitch, 0.0)
}

/// Device attitude for every gyroscope sample of a batch.
#[derive(Clone, Debug)]
pub struct OrientationTrack {
    rotations: Vec<Attitude>,
    accel_rate_hz: f64,
    gyro_rate_hz: f64,
}

impl OrientationTrack {
    /// Integrate the gyroscope from the rest-window attitude.
    ///
    /// Each step applies the exact rotation about ω by |ω|/f, which keeps
    /// every matrix orthonormal. Streams of different length are integrated
    /// over the shorter one.
    pub fn integrate(
        accel: &[AccelData],
        gyro: &[GyroData],
        unit: GyroUnit,
        config: &PdrConfig,
    ) -> Result<Self, PdrError> {
        let timestamps: Vec<f64> = accel.iter().map(|a| a.timestamp).collect();
        let accel_rate_hz = estimate_sample_rate(&timestamps)?;
        let duration = timestamps[timestamps.len() - 1] - timestamps[0];
        let gyro_rate_hz = (gyro.len() as f64 / duration).ceil().max(1.0);

        if let Some(i) = gyro.iter().position(|g| !g.is_finite()) {
            return Err(PdrError::NonFiniteSample(i));
        }

        let scale = match resolve_gyro_unit(gyro, unit, config.gyro_auto_deg_threshold) {
            GyroUnit::DegPerSec => PI / 180.0,
            _ => 1.0,
        };

        let rest_samples = (config.rest_window_secs * accel_rate_hz).ceil() as usize;
        let mut current = initial_attitude(accel, rest_samples);

        let m = accel.len().min(gyro.len());
        let mut rotations = Vec::with_capacity(m.max(1));
        rotations.push(current);
        for g in gyro.iter().take(m).skip(1) {
            let omega = Vector3::new(g.x, g.y, g.z) * (scale / gyro_rate_hz);
            current = current * Rotation3::new(omega);
            rotations.push(current);
        }

        Ok(Self { rotations, accel_rate_hz, gyro_rate_hz })
    }

    pub fn accel_rate_hz(&self) -> f64 {
        self.accel_rate_hz
    }

    pub fn gyro_rate_hz(&self) -> f64 {
        self.gyro_rate_hz
    }

    pub fn len(&self) -> usize {
        self.rotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }

    /// Attitude at the gyroscope sample matching an accelerometer index.
    pub fn attitude_at(&self, accel_index: usize) -> Attitude {
        let scaled = (accel_index as f64 * self.gyro_rate_hz / self.accel_rate_hz).floor();
        let last = self.rotations.len().saturating_sub(1);
        let j = if scaled.is_finite() && scaled >= 0.0 {
            (scaled as usize).min(last)
        } else {
            0
        };
        self.rotations.get(j).copied().unwrap_or_else(Attitude::identity)
    }

    /// Heading in the horizontal plane, wrapped to (−π, π].
    pub fn heading_at(&self, accel_index: usize) -> f64 {
        let r = self.attitude_at(accel_index);
        let m = r.matrix();
        wrap_angle(m[(1, 0)].atan2(m[(0, 0)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn level_accel(n: usize, rate: f64) -> Vec<AccelData> {
        (0..n)
            .map(|i| AccelData { timestamp: i as f64 / rate, x: 0.0, y: 0.0, z: 9.81 })
            .collect()
    }

    fn gyro_z(n: usize, rate: f64, wz: f64) -> Vec<GyroData> {
        (0..n)
            .map(|i| GyroData { timestamp: i as f64 / rate, x: 0.0, y: 0.0, z: wz })
            .collect()
    }

    #[test]
    fn test_wrap_angle() {
        assert_abs_diff_eq!(wrap_angle(0.0), 0.0);
        assert_abs_diff_eq!(wrap_angle(PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(-PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(-5.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(4.0 * PI + 0.1), 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_level_device_is_identity() {
        let r = initial_attitude(&level_accel(50, 50.0), 250);
        assert_abs_diff_eq!(r.matrix(), Attitude::identity().matrix(), epsilon = 1e-12);
    }

    #[test]
    fn test_initial_roll_from_gravity() {
        let roll: f64 = 0.3;
        let accel: Vec<AccelData> = (0..20)
            .map(|i| AccelData {
                timestamp: i as f64 * 0.02,
                x: 0.0,
                y: 9.81 * roll.sin(),
                z: 9.81 * roll.cos(),
            })
            .collect();
        let (r, p, y) = initial_attitude(&accel, 20).euler_angles();
        assert_abs_diff_eq!(r, roll, epsilon = 1e-9);
        assert_abs_diff_eq!(p, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_constant_yaw_rate_heading() {
        let n = 101;
        let accel = level_accel(n, 50.0);
        let gyro = gyro_z(n, 50.0, 0.5);
        let track =
            OrientationTrack::integrate(&accel, &gyro, GyroUnit::RadPerSec, &PdrConfig::default())
                .unwrap();
        assert_eq!(track.len(), n);
        let expected = 0.5 * (n - 1) as f64 / track.gyro_rate_hz();
        assert_abs_diff_eq!(track.heading_at(n - 1), expected, epsilon = 1e-9);
        assert_abs_diff_eq!(track.heading_at(0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degrees_auto_detected() {
        let n = 101;
        let accel = level_accel(n, 50.0);
        let config = PdrConfig::default();
        let rad = OrientationTrack::integrate(&accel, &gyro_z(n, 50.0, 0.5), GyroUnit::RadPerSec, &config)
            .unwrap();
        let deg = OrientationTrack::integrate(
            &accel,
            &gyro_z(n, 50.0, 0.5_f64.to_degrees()),
            GyroUnit::Auto,
            &config,
        )
        .unwrap();
        assert_abs_diff_eq!(rad.heading_at(80), deg.heading_at(80), epsilon = 1e-9);
    }

    #[test]
    fn test_auto_keeps_small_rates_as_radians() {
        let gyro = gyro_z(10, 50.0, 2.0);
        assert_eq!(resolve_gyro_unit(&gyro, GyroUnit::Auto, 10.0), GyroUnit::RadPerSec);
        assert_eq!(resolve_gyro_unit(&gyro, GyroUnit::DegPerSec, 10.0), GyroUnit::DegPerSec);
    }

    #[test]
    fn test_heading_index_is_clamped() {
        let accel = level_accel(100, 50.0);
        let gyro = gyro_z(40, 50.0, 0.2);
        let track =
            OrientationTrack::integrate(&accel, &gyro, GyroUnit::RadPerSec, &PdrConfig::default())
                .unwrap();
        assert_eq!(track.len(), 40);
        assert_abs_diff_eq!(track.heading_at(10_000), track.heading_at(99), epsilon = 1e-12);
    }

    #[test]
    fn test_rotations_stay_orthonormal() {
        let n = 2000;
        let accel = level_accel(n, 100.0);
        let gyro: Vec<GyroData> = (0..n)
            .map(|i| {
                let t = i as f64 / 100.0;
                GyroData { timestamp: t, x: 0.7 * t.sin(), y: -0.4 * (2.0 * t).cos(), z: 1.1 }
            })
            .collect();
        let track =
            OrientationTrack::integrate(&accel, &gyro, GyroUnit::RadPerSec, &PdrConfig::default())
                .unwrap();
        let m = track.attitude_at(n - 1).into_inner();
        assert_abs_diff_eq!(m.determinant(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m * m.transpose(), nalgebra::Matrix3::identity(), epsilon = 1e-9);
    }
}

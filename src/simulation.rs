// simulation.rs — Synthetic IMU streams for tests and the `simulate` binary.
//
// A walk is modelled as a vertical bounce: one sinusoid period of the
// accelerometer magnitude per step, on top of gravity, with the device held
// level. Heading is set by turning about the vertical axis during the
// initial rest, so the step phase itself is free of rotation.

use serde::{Deserialize, Serialize};

use crate::types::{AccelData, GyroData, GyroUnit, ImuBatch};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticWalk {
    pub rate_hz: f64,
    pub start_time: f64,
    /// Standing still before the first step.
    pub rest_secs: f64,
    pub steps: usize,
    pub step_period_secs: f64,
    /// Peak vertical acceleration of the bounce, m/s².
    pub bounce_amplitude: f64,
    pub gravity: f64,
    /// Walking direction, radians counter-clockwise from east.
    pub heading_rad: f64,
    /// Standing still after the last step.
    pub tail_secs: f64,
    pub gyro_unit: GyroUnit,
}

impl Default for SyntheticWalk {
    fn default() -> Self {
        Self {
            rate_hz: 50.0,
            start_time: 0.0,
            rest_secs: 2.0,
            steps: 10,
            step_period_secs: 1.0,
            bounce_amplitude: 1.5,
            gravity: 9.81,
            heading_rad: 0.0,
            tail_secs: 1.0,
            gyro_unit: GyroUnit::RadPerSec,
        }
    }
}

impl SyntheticWalk {
    /// Weinberg constant that turns this walk's bounce into `stride_m`.
    pub fn weinberg_k_for(&self, stride_m: f64) -> f64 {
        stride_m / (2.0 * self.bounce_amplitude).powf(0.25)
    }

    fn sample_counts(&self) -> (usize, usize, usize) {
        let rest = (self.rest_secs * self.rate_hz).round() as usize;
        let walk = (self.steps as f64 * self.step_period_secs * self.rate_hz).round() as usize;
        let tail = (self.tail_secs * self.rate_hz).round() as usize;
        (rest, walk, tail)
    }

    pub fn sample_count(&self) -> usize {
        let (rest, walk, tail) = self.sample_counts();
        rest + walk + tail
    }

    /// The whole walk as one batch.
    pub fn generate(&self) -> ImuBatch {
        let (n_rest, n_walk, _) = self.sample_counts();
        let n = self.sample_count();

        // Turn rate matched to the rate estimate used downstream, ceil(n / T),
        // so the integrated yaw lands exactly on `heading_rad`.
        let duration = (n.max(2) - 1) as f64 / self.rate_hz;
        let rate_estimate = (n as f64 / duration).ceil();
        let turn_samples = (n_rest / 2).max(1);
        let turn_rate = self.heading_rad * rate_estimate / turn_samples as f64;
        let gyro_scale = match self.gyro_unit {
            GyroUnit::DegPerSec => 180.0 / std::f64::consts::PI,
            _ => 1.0,
        };

        let omega = 2.0 * std::f64::consts::PI / self.step_period_secs;
        let mut accel = Vec::with_capacity(n);
        let mut gyro = Vec::with_capacity(n);
        for i in 0..n {
            let t = self.start_time + i as f64 / self.rate_hz;
            let bounce = if (n_rest..n_rest + n_walk).contains(&i) {
                let tau = (i - n_rest) as f64 / self.rate_hz;
                self.bounce_amplitude * (omega * tau).sin()
            } else {
                0.0
            };
            accel.push(AccelData { timestamp: t, x: 0.0, y: 0.0, z: self.gravity + bounce });

            let wz = if (1..=turn_samples).contains(&i) { turn_rate * gyro_scale } else { 0.0 };
            gyro.push(GyroData { timestamp: t, x: 0.0, y: 0.0, z: wz });
        }

        ImuBatch::new(accel, gyro, self.gyro_unit)
    }

    /// The walk cut into consecutive batches of `batch_samples` samples.
    /// A trailing remainder shorter than two samples is dropped.
    pub fn generate_batches(&self, batch_samples: usize) -> Vec<ImuBatch> {
        let whole = self.generate();
        let size = batch_samples.max(2);
        whole
            .accel
            .chunks(size)
            .zip(whole.gyro.chunks(size))
            .filter(|(a, _)| a.len() >= 2)
            .map(|(a, g)| ImuBatch::new(a.to_vec(), g.to_vec(), whole.gyro_unit))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_sample_layout() {
        let walk = SyntheticWalk::default();
        let batch = walk.generate();
        assert_eq!(batch.accel.len(), 650);
        assert_eq!(batch.gyro.len(), 650);
        assert_abs_diff_eq!(batch.accel[0].z, 9.81);
        assert_abs_diff_eq!(batch.accel[649].z, 9.81);
        assert_abs_diff_eq!(batch.last_timestamp().unwrap(), 649.0 / 50.0, epsilon = 1e-12);
    }

    #[test]
    fn test_batches_are_contiguous() {
        let walk = SyntheticWalk::default();
        let batches = walk.generate_batches(100);
        assert_eq!(batches.len(), 7);
        for pair in batches.windows(2) {
            assert!(pair[1].first_timestamp().unwrap() > pair[0].last_timestamp().unwrap());
        }
    }

    #[test]
    fn test_weinberg_k_for() {
        let walk = SyntheticWalk::default();
        assert_abs_diff_eq!(walk.weinberg_k_for(0.7) * 3.0_f64.powf(0.25), 0.7, epsilon = 1e-12);
    }
}

//! Weinberg stride length and per-step heading.

use ndarray::Array1;

use crate::config::PdrConfig;
use crate::pdr::orientation::OrientationTrack;
use crate::smoothing::lowpass_zero_phase;
use crate::types::{AccelData, StepEvent, StrideRecord};

/// `K · (max − min)^(1/4)` over the samples around `index`, clamped to the
/// configured range. Falls back to the default stride when the window is
/// empty or flat.
pub fn weinberg_stride(filtered: &Array1<f64>, index: usize, config: &PdrConfig) -> f64 {
    let n = filtered.len();
    if index >= n {
        return config.default_stride_m;
    }
    let lo = index.saturating_sub(config.stride_half_window);
    let hi = (index + config.stride_half_window).min(n);

    let (min, max) = filtered
        .iter()
        .skip(lo)
        .take(hi - lo)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(mn, mx), v| (mn.min(*v), mx.max(*v)));

    let stride = if hi <= lo || max <= min {
        config.default_stride_m
    } else {
        config.weinberg_k * (max - min).powf(0.25)
    };
    stride.clamp(config.min_stride_m, config.max_stride_m)
}

pub struct StrideEstimator {
    config: PdrConfig,
}

impl StrideEstimator {
    pub fn new(config: PdrConfig) -> Self {
        Self { config }
    }

    /// One stride record per step, in step order.
    pub fn estimate(
        &self,
        accel: &[AccelData],
        steps: &[StepEvent],
        orientation: &OrientationTrack,
    ) -> Vec<StrideRecord> {
        if steps.is_empty() {
            return Vec::new();
        }
        let magnitude: Array1<f64> = accel.iter().map(|a| a.magnitude()).collect();
        let filtered = lowpass_zero_phase(
            &magnitude,
            self.config.filter_order,
            self.config.stride_lowpass_hz,
            orientation.accel_rate_hz(),
        );

        steps
            .iter()
            .map(|step| StrideRecord {
                stride_length_m: weinberg_stride(&filtered, step.sample_index, &self.config),
                heading_rad: orientation.heading_at(step.sample_index),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GyroData, GyroUnit};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_flat_window_uses_default() {
        let filtered = Array1::from_elem(100, 9.81);
        assert_abs_diff_eq!(weinberg_stride(&filtered, 50, &PdrConfig::default()), 0.7);
    }

    #[test]
    fn test_index_outside_batch_uses_default() {
        let filtered = Array1::from_vec(vec![9.0, 10.0, 11.0]);
        assert_abs_diff_eq!(weinberg_stride(&filtered, 3, &PdrConfig::default()), 0.7);
    }

    #[test]
    fn test_weinberg_formula() {
        let mut filtered = Array1::from_elem(100, 9.8);
        filtered[45] = 9.8 + 8.0;
        filtered[60] = 9.8 - 8.0;
        // Δ = 16 → 16^(1/4) = 2 → 0.4 · 2
        assert_abs_diff_eq!(weinberg_stride(&filtered, 50, &PdrConfig::default()), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_window_is_half_open_and_clipped() {
        let config = PdrConfig::default();
        let mut filtered = Array1::from_elem(100, 9.8);
        // idx + 20 lies just outside the window
        filtered[70] = 30.0;
        assert_abs_diff_eq!(weinberg_stride(&filtered, 50, &config), 0.7);
        // near the start the window is clipped at 0
        filtered[0] = 9.8 + 16.0;
        assert_abs_diff_eq!(weinberg_stride(&filtered, 5, &config), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_stride_is_clamped() {
        let config = PdrConfig::default();
        let mut filtered = Array1::from_elem(50, 9.8);
        filtered[25] = 9.8 + 1e-6;
        assert_abs_diff_eq!(weinberg_stride(&filtered, 25, &config), config.min_stride_m);
        filtered[25] = 9.8 + 1e4;
        assert_abs_diff_eq!(weinberg_stride(&filtered, 25, &config), config.max_stride_m);
    }

    #[test]
    fn test_records_follow_steps() {
        let n = 200;
        let accel: Vec<AccelData> = (0..n)
            .map(|i| {
                let t = i as f64 * 0.02;
                AccelData { timestamp: t, x: 0.0, y: 0.0, z: 9.8 + 1.5 * (2.0 * std::f64::consts::PI * t).sin() }
            })
            .collect();
        let gyro: Vec<GyroData> = (0..n)
            .map(|i| GyroData { timestamp: i as f64 * 0.02, x: 0.0, y: 0.0, z: 0.0 })
            .collect();
        let config = PdrConfig::default();
        let track = OrientationTrack::integrate(&accel, &gyro, GyroUnit::RadPerSec, &config).unwrap();
        let steps = [
            StepEvent { sample_index: 60, timestamp: 1.2 },
            StepEvent { sample_index: 110, timestamp: 2.2 },
        ];
        let records = StrideEstimator::new(config.clone()).estimate(&accel, &steps, &track);
        assert_eq!(records.len(), 2);
        for r in &records {
            assert!(r.stride_length_m >= config.min_stride_m && r.stride_length_m <= config.max_stride_m);
            assert_abs_diff_eq!(r.heading_rad, 0.0, epsilon = 1e-12);
            // Δ ≈ 3.0 peak to trough
            assert_abs_diff_eq!(r.stride_length_m, 0.4 * 3.0_f64.powf(0.25), epsilon = 0.02);
        }
    }
}

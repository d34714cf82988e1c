//! Step detection on the accelerometer magnitude.
//!
//! The magnitude is low-passed (zero-phase), detrended against a slowly
//! adapting gravity estimate, and classified with dual thresholds. A step
//! fires on the first "falling" sample after a quiet sample, provided the
//! preceding window held a real rising phase.

use ndarray::Array1;

use crate::config::PdrConfig;
use crate::error::PdrError;
use crate::smoothing::{lowpass_zero_phase, GravityTracker};
use crate::types::StepEvent;

/// Per-sample body phase derived from the detrended magnitude.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Up phase of the body, start of a step.
    Rising,
    /// Down phase of the body, end of a step.
    Falling,
    Neutral,
}

impl Phase {
    pub fn value(self) -> i32 {
        match self {
            Phase::Rising => 1,
            Phase::Falling => -1,
            Phase::Neutral => 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StepDetection {
    pub steps: Vec<StepEvent>,
    /// True for samples inside a stance window.
    pub stance_mask: Vec<bool>,
    pub sample_rate_hz: f64,
}

impl StepDetection {
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// `ceil(n / duration)` after checking that timestamps are usable.
pub fn estimate_sample_rate(timestamps: &[f64]) -> Result<f64, PdrError> {
    let n = timestamps.len();
    if n < 2 {
        return Err(PdrError::TooFewSamples(n));
    }
    if let Some(i) = timestamps.iter().position(|t| !t.is_finite()) {
        return Err(PdrError::NonFiniteSample(i));
    }
    if let Some(i) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
        return Err(PdrError::NonMonotonicTimestamps(i + 1));
    }
    let duration = timestamps[n - 1] - timestamps[0];
    if duration <= 0.0 {
        return Err(PdrError::NonPositiveDuration(duration));
    }
    Ok((n as f64 / duration).ceil())
}

/// Dual-threshold classification with down-phase hysteresis: a falling
/// sample right after a rising one is treated as neutral.
pub fn classify(detrended: &[f64], threshold: f64, discard: f64) -> Vec<Phase> {
    let mut phases = Vec::with_capacity(detrended.len());
    for (i, &value) in detrended.iter().enumerate() {
        let phase = if value > threshold && value < discard {
            Phase::Rising
        } else if value < -threshold {
            if i > 0 && phases[i - 1] == Phase::Rising {
                Phase::Neutral
            } else {
                Phase::Falling
            }
        } else {
            Phase::Neutral
        };
        phases.push(phase);
    }
    phases
}

/// Marks `stance_window` samples from each step index, clipped to `n`.
pub fn stance_mask(steps: &[StepEvent], n: usize, stance_window: usize) -> Vec<bool> {
    let mut mask = vec![false; n];
    for step in steps {
        let end = (step.sample_index + stance_window).min(n);
        for slot in mask.iter_mut().take(end).skip(step.sample_index) {
            *slot = true;
        }
    }
    mask
}

pub struct StepDetector {
    config: PdrConfig,
}

impl StepDetector {
    pub fn new(config: PdrConfig) -> Self {
        Self { config }
    }

    /// Detect steps in a magnitude stream.
    ///
    /// Mismatched lengths are truncated to the shorter input. Malformed
    /// timestamps or non-finite magnitudes are reported as `PdrError`.
    pub fn detect(&self, magnitude: &[f64], timestamps: &[f64]) -> Result<StepDetection, PdrError> {
        let n = magnitude.len().min(timestamps.len());
        if magnitude.len() != timestamps.len() {
            log::debug!(
                "Magnitude/timestamp length mismatch ({} vs {}), truncating to {}",
                magnitude.len(),
                timestamps.len(),
                n
            );
        }
        let magnitude = &magnitude[..n];
        let timestamps = &timestamps[..n];

        let sample_rate_hz = estimate_sample_rate(timestamps)?;
        if let Some(i) = magnitude.iter().position(|a| !a.is_finite()) {
            return Err(PdrError::NonFiniteSample(i));
        }

        let cfg = &self.config;
        let raw = Array1::from_vec(magnitude.to_vec());
        let filtered = lowpass_zero_phase(&raw, cfg.filter_order, cfg.step_lowpass_hz, sample_rate_hz);

        // Gravity follows the raw magnitude; sample 0 is left neutral.
        let mut gravity = GravityTracker::new(cfg.gravity_alpha, cfg.gravity_seed);
        let mut detrended = vec![0.0; n];
        for i in 1..n {
            let g = gravity.update(magnitude[i]);
            detrended[i] = filtered[i] - g;
        }

        let phases = classify(&detrended, cfg.step_threshold, cfg.step_discard_threshold);

        let window = (cfg.step_window_secs * sample_rate_hz).floor() as usize;
        let mut steps = Vec::new();
        // A huge rate from a tiny span saturates `window`; such batches simply yield nothing.
        for i in window.saturating_add(2)..n {
            if phases[i] != Phase::Falling || phases[i - 1] != Phase::Neutral {
                continue;
            }
            let (lo, hi) = (i - window, i - 2);
            let preceding: i32 = if lo < hi {
                phases[lo..hi].iter().map(|p| p.value()).sum()
            } else {
                0
            };
            if preceding > 1 {
                steps.push(StepEvent { sample_index: i, timestamp: timestamps[i] });
            }
        }

        log::debug!(
            "Detected {} steps in {} samples at {:.0} Hz",
            steps.len(),
            n,
            sample_rate_hz
        );

        let stance_mask = stance_mask(&steps, n, cfg.stance_window);
        Ok(StepDetection { steps, stance_mask, sample_rate_hz })
    }
}

// config.rs — Tunables for the PDR pipeline, the position filter and the session.
//
// Every structural constant of the pipeline lives here with its default. The
// structs deserialize with `#[serde(default)]`, so a JSON file only needs the
// keys it wants to override.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::FilterError;

// ─── PDR ─────────────────────────────────────────────────────────────────────

/// Which displacement the pipeline hands to the filter after a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaPolicy {
    /// Displacement of the most recent step only.
    #[default]
    LastStep,
    /// Net displacement over every step of the batch.
    BatchNet,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdrConfig {
    // ── Step detection ──
    pub step_lowpass_hz: f64,
    pub filter_order: usize,
    pub step_threshold: f64,
    pub step_discard_threshold: f64,
    pub gravity_alpha: f64,
    pub gravity_seed: f64,
    pub step_window_secs: f64,
    pub stance_window: usize,

    // ── Attitude ──
    pub rest_window_secs: f64,
    pub gyro_auto_deg_threshold: f64,

    // ── Stride (Weinberg) ──
    pub weinberg_k: f64,
    pub stride_lowpass_hz: f64,
    pub stride_half_window: usize,
    pub default_stride_m: f64,
    pub min_stride_m: f64,
    pub max_stride_m: f64,

    // ── Output ──
    pub delta_policy: DeltaPolicy,
}

impl Default for PdrConfig {
    fn default() -> Self {
        Self {
            step_lowpass_hz: 2.0,
            filter_order: 4,
            step_threshold: 0.4,
            step_discard_threshold: 2.0,
            gravity_alpha: 0.999,
            gravity_seed: 9.8,
            step_window_secs: 0.4,
            stance_window: 10,
            rest_window_secs: 5.0,
            gyro_auto_deg_threshold: 10.0,
            weinberg_k: 0.4,
            stride_lowpass_hz: 3.0,
            stride_half_window: 20,
            default_stride_m: 0.7,
            min_stride_m: 0.3,
            max_stride_m: 1.2,
            delta_policy: DeltaPolicy::LastStep,
        }
    }
}

// ─── Filter ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Diagonal of Q, added to P on every prediction.
    pub process_noise: [f64; 3],
    /// Diagonal of R for soft absolute measurements.
    pub measurement_noise: [f64; 3],
    /// Starting state (x, y, floor).
    pub initial_state: [f64; 3],
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            process_noise: [0.1, 0.1, 0.1],
            measurement_noise: [2.0, 2.0, 2.0],
            initial_state: [0.0, 0.0, 0.0],
        }
    }
}

impl FilterConfig {
    /// R must be positive definite and Q positive semi-definite, otherwise
    /// the covariance cannot stay valid.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.process_noise.iter().any(|q| !q.is_finite() || *q < 0.0) {
            return Err(FilterError::InvalidNoise(format!(
                "process noise must be finite and >= 0, got {:?}",
                self.process_noise
            )));
        }
        if self.measurement_noise.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(FilterError::InvalidNoise(format!(
                "measurement noise must be finite and > 0, got {:?}",
                self.measurement_noise
            )));
        }
        if self.initial_state.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::NonFiniteInput(format!(
                "initial state {:?}",
                self.initial_state
            )));
        }
        Ok(())
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoOrigin {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub pdr: PdrConfig,
    pub filter: FilterConfig,
    pub origin: GeoOrigin,
    /// Floor used for scans that carry neither a floor nor a parseable room.
    pub default_floor: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            pdr: PdrConfig::default(),
            filter: FilterConfig::default(),
            origin: GeoOrigin { longitude: 2.1734, latitude: 41.3851 },
            default_floor: 2,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: TrackerConfig =
            serde_json::from_str(json).context("Failed to parse tracker config")?;
        config.filter.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json_str(&text)
    }
}

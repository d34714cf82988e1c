//! Pedestrian dead reckoning: one IMU batch in, one displacement out.
//!
//! ```text
//! accel |a| ──► StepDetector ──► steps ─┐
//!                                       ├─► StrideEstimator ──► PositionIntegrator ──► delta
//! gyro ──► OrientationTrack ────────────┘
//! ```

pub mod integrator;
pub mod orientation;
pub mod step_detection;
pub mod stride;

use serde::{Deserialize, Serialize};

use crate::config::{DeltaPolicy, PdrConfig};
use crate::error::PdrError;
use crate::types::{ImuBatch, PositionDelta, StepEvent, StrideRecord};

pub use integrator::PositionIntegrator;
pub use orientation::{wrap_angle, OrientationTrack};
pub use step_detection::{StepDetection, StepDetector};
pub use stride::StrideEstimator;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PdrOutput {
    pub steps: Vec<StepEvent>,
    pub strides: Vec<StrideRecord>,
    /// Per-batch path, starting at (0, 0).
    pub trajectory: Vec<(f64, f64)>,
    /// What the filter receives, chosen by `DeltaPolicy`.
    pub delta: PositionDelta,
    pub net_displacement: PositionDelta,
    pub sample_rate_hz: f64,
}

impl PdrOutput {
    /// Result of a batch that could not be processed: no steps, no motion.
    pub fn neutral() -> Self {
        Self { trajectory: vec![(0.0, 0.0)], ..Default::default() }
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn total_distance(&self) -> f64 {
        self.strides.iter().map(|s| s.stride_length_m).sum()
    }
}

pub struct PdrPipeline {
    config: PdrConfig,
    detector: StepDetector,
    stride: StrideEstimator,
}

impl PdrPipeline {
    pub fn new(config: PdrConfig) -> Self {
        Self {
            detector: StepDetector::new(config.clone()),
            stride: StrideEstimator::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &PdrConfig {
        &self.config
    }

    /// Run the full chain on one batch.
    ///
    /// Accelerometer and gyroscope streams of different length are truncated
    /// to the shorter one.
    pub fn process(&self, batch: &ImuBatch) -> Result<PdrOutput, PdrError> {
        let n = batch.accel.len().min(batch.gyro.len());
        if batch.accel.len() != batch.gyro.len() {
            log::debug!(
                "Accel/gyro length mismatch ({} vs {}), truncating to {}",
                batch.accel.len(),
                batch.gyro.len(),
                n
            );
        }
        let accel = &batch.accel[..n];
        let gyro = &batch.gyro[..n];

        if let Some(i) = accel.iter().position(|a| !a.is_finite()) {
            return Err(PdrError::NonFiniteSample(i));
        }

        let magnitude: Vec<f64> = accel.iter().map(|a| a.magnitude()).collect();
        let timestamps: Vec<f64> = accel.iter().map(|a| a.timestamp).collect();
        let detection = self.detector.detect(&magnitude, &timestamps)?;

        let orientation = OrientationTrack::integrate(accel, gyro, batch.gyro_unit, &self.config)?;
        let strides = self.stride.estimate(accel, &detection.steps, &orientation);

        let integrator = PositionIntegrator::from_strides(&strides);
        let net_displacement = integrator.net_displacement();
        let delta = match self.config.delta_policy {
            DeltaPolicy::LastStep => integrator.pdr_delta(),
            DeltaPolicy::BatchNet => net_displacement,
        };

        Ok(PdrOutput {
            steps: detection.steps,
            strides,
            trajectory: integrator.trajectory().to_vec(),
            delta,
            net_displacement,
            sample_rate_hz: detection.sample_rate_hz,
        })
    }

    /// `process`, with any batch error logged and turned into a neutral output.
    pub fn process_or_neutral(&self, batch: &ImuBatch) -> PdrOutput {
        match self.process(batch) {
            Ok(output) => output,
            Err(e) => {
                log::warn!("PDR batch rejected: {}", e);
                PdrOutput::neutral()
            }
        }
    }
}

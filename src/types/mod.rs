pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccelData {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelData {
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GyroData {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GyroData {
    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn max_abs_component(&self) -> f64 {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }
}

/// Unit of the gyroscope stream inside one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GyroUnit {
    #[default]
    RadPerSec,
    DegPerSec,
    /// Decide from the batch magnitude (see `PdrConfig::gyro_auto_deg_threshold`).
    Auto,
}

/// One processing call worth of IMU data.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImuBatch {
    pub accel: Vec<AccelData>,
    pub gyro: Vec<GyroData>,
    #[serde(default)]
    pub gyro_unit: GyroUnit,
}

impl ImuBatch {
    pub fn new(accel: Vec<AccelData>, gyro: Vec<GyroData>, gyro_unit: GyroUnit) -> Self {
        Self { accel, gyro, gyro_unit }
    }

    pub fn is_empty(&self) -> bool {
        self.accel.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<f64> {
        self.accel.first().map(|a| a.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.accel.last().map(|a| a.timestamp)
    }
}

/// A footstep detected in the accelerometer stream.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub sample_index: usize,
    pub timestamp: f64,
}

/// Stride length and heading for one step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrideRecord {
    pub stride_length_m: f64,
    pub heading_rad: f64,
}

/// Relative displacement in the local frame, meters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionDelta {
    pub dx: f64,
    pub dy: f64,
}

impl PositionDelta {
    pub const ZERO: PositionDelta = PositionDelta { dx: 0.0, dy: 0.0 };

    pub fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    pub fn norm(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// Absolute position reset from a scanned location marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerScan {
    pub timestamp: f64,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub floor: Option<i32>,
    #[serde(default)]
    pub room: Option<String>,
}

impl MarkerScan {
    pub fn is_valid(&self) -> bool {
        self.timestamp.is_finite() && self.longitude.is_finite() && self.latitude.is_finite()
    }
}

use std::fs;
use std::io;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current position estimate in both frames.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PositionReport {
    /// Timestamp of the newest data folded into the estimate [s]
    pub timestamp: f64,
    // Local frame
    pub x: f64,
    pub y: f64,
    pub floor: i32,
    // Geodetic
    pub longitude: f64,
    pub latitude: f64,
    pub covariance_trace: f64,
    pub nearest_marker: Option<String>,
    pub nearest_marker_distance_m: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SessionStats {
    pub batches_processed: u64,
    pub batches_rejected: u64,
    pub steps_total: u64,
    pub distance_total_m: f64,
    pub marker_resets: u64,
    pub last_marker_room: Option<String>,
}

/// What the tracker publishes after each tick.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub generated_at: String,
    pub timestamp: f64,
    pub origin_longitude: f64,
    pub origin_latitude: f64,
    pub position: PositionReport,
    pub stats: SessionStats,
}

impl LiveStatus {
    pub fn new(position: PositionReport, stats: SessionStats, origin: (f64, f64)) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            timestamp: current_timestamp(),
            origin_longitude: origin.0,
            origin_latitude: origin.1,
            position,
            stats,
        }
    }

    /// Write pretty JSON next to `path` and rename it into place, so readers
    /// never see a half-written file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

pub fn current_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

//! Indoor pedestrian tracking: step-and-heading dead reckoning from a
//! body-worn IMU, fused with absolute resets from scanned location markers.

pub mod config;
pub mod coords;
pub mod error;
pub mod filters;
pub mod live_status;
pub mod markers;
pub mod pdr;
pub mod sensor_fusion;
pub mod simulation;
pub mod smoothing;
pub mod types;

pub use config::{DeltaPolicy, FilterConfig, GeoOrigin, PdrConfig, TrackerConfig};
pub use coords::CoordinateTransform;
pub use error::{FilterError, PdrError, TrackerError, TrackerResult};
pub use filters::{FilterState, FusionFilter};
pub use live_status::{LiveStatus, PositionReport};
pub use markers::{MarkerRegistry, QrEvent};
pub use pdr::{PdrOutput, PdrPipeline};
pub use sensor_fusion::{FusionEvent, IndoorTracker, SharedTracker, TickOutcome};
pub use types::{AccelData, GyroData, GyroUnit, ImuBatch, MarkerScan, PositionDelta};

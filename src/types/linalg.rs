//! Linear algebra type aliases for the position filter and attitude propagation.
//!
//! Keeps dimensions visible at the type level so the filter code reads like
//! the textbook equations.

use nalgebra::{Rotation3, SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 3; // (x, y, floor)

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POSITION: usize = 3; // (x, y, floor)

// ===== Filter Types =====
pub type StateVec3 = SVector<f64, STATE_DIM>;
pub type StateMat3 = SMatrix<f64, STATE_DIM, STATE_DIM>;

pub type PositionMeasurement = SVector<f64, MEASURE_DIM_POSITION>;
pub type PositionNoise = SMatrix<f64, MEASURE_DIM_POSITION, MEASURE_DIM_POSITION>;
pub type KalmanGain3 = SMatrix<f64, STATE_DIM, MEASURE_DIM_POSITION>;

// ===== Attitude =====
/// Body-to-world rotation, one per gyroscope sample.
pub type Attitude = Rotation3<f64>;

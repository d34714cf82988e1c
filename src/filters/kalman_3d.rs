use nalgebra::SymmetricEigen;
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::error::FilterError;
use crate::types::{KalmanGain3, PositionDelta, PositionMeasurement, PositionNoise, StateMat3, StateVec3};

/// Smallest eigenvalue tolerated before the covariance counts as broken.
const PSD_TOLERANCE: f64 = -1e-9;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterState {
    /// Position in the local frame (East, North) [meters]
    pub x: f64,
    pub y: f64,
    pub floor: i32,

    /// Row-major 3×3 covariance of (x, y, floor)
    pub covariance: [[f64; 3]; 3],
    pub covariance_trace: f64,

    /// Operation counters
    pub predictions: u64,
    pub updates: u64,
    pub resets: u64,
}

/// Linear Kalman filter over (x, y, floor) with identity dynamics.
///
/// Dead-reckoning deltas drive `predict`; marker scans hard-`reset` the state.
/// `update` is a soft correction of (x, y); the floor and its variance are
/// left to `predict` and `reset`.
pub struct FusionFilter {
    state: StateVec3,
    covariance: StateMat3,
    process_noise: StateMat3,
    measurement_noise: PositionNoise,
    initial_state: StateVec3,

    predictions: u64,
    updates: u64,
    resets: u64,
}

impl FusionFilter {
    pub fn new(config: &FilterConfig) -> Result<Self, FilterError> {
        config.validate()?;
        let initial_state = StateVec3::from(config.initial_state);
        Ok(Self {
            state: initial_state,
            covariance: StateMat3::identity(),
            process_noise: StateMat3::from_diagonal(&StateVec3::from(config.process_noise)),
            measurement_noise: PositionNoise::from_diagonal(&StateVec3::from(config.measurement_noise)),
            initial_state,
            predictions: 0,
            updates: 0,
            resets: 0,
        })
    }

    /// x ← x + [dx, dy, 0], P ← P + Q
    pub fn predict(&mut self, delta: PositionDelta) -> Result<(), FilterError> {
        if !delta.dx.is_finite() || !delta.dy.is_finite() {
            return Err(FilterError::NonFiniteInput(format!(
                "prediction delta ({}, {})",
                delta.dx, delta.dy
            )));
        }
        let covariance = self.covariance + self.process_noise;
        check_covariance(&covariance)?;

        self.state[0] += delta.dx;
        self.state[1] += delta.dy;
        self.covariance = covariance;
        self.predictions += 1;
        Ok(())
    }

    /// Soft position correction. `noise_override` replaces R for this call.
    pub fn update(
        &mut self,
        measurement: PositionMeasurement,
        noise_override: Option<PositionNoise>,
    ) -> Result<(), FilterError> {
        if measurement.iter().any(|v| !v.is_finite()) {
            return Err(FilterError::NonFiniteInput(format!("measurement {:?}", measurement.as_slice())));
        }
        let r = match noise_override {
            Some(r) => {
                check_measurement_noise(&r)?;
                r
            }
            None => self.measurement_noise,
        };

        let p = self.covariance;
        let s = p + r;
        let s_inv = s.try_inverse().ok_or(FilterError::SingularInnovation)?;
        let mut k: KalmanGain3 = p * s_inv;
        // Floor only moves through reset: no gain into or out of it.
        k.fill_row(2, 0.0);
        k.fill_column(2, 0.0);

        let mut innovation = measurement - self.state;
        innovation[2] = 0.0;
        let state = self.state + k * innovation;

        // Joseph form
        let i_minus_k = StateMat3::identity() - k;
        let joseph = i_minus_k * p * i_minus_k.transpose() + k * r * k.transpose();
        // Symmetrize to limit numerical drift
        let covariance = (joseph + joseph.transpose()) * 0.5;
        check_covariance(&covariance)?;

        self.state = state;
        self.covariance = covariance;
        self.updates += 1;
        Ok(())
    }

    /// Hard reset to a trusted position, covariance back to I.
    pub fn reset(&mut self, x: f64, y: f64, floor: i32) -> Result<(), FilterError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(FilterError::NonFiniteInput(format!("reset position ({}, {})", x, y)));
        }
        self.state = StateVec3::new(x, y, floor as f64);
        self.covariance = StateMat3::identity();
        self.resets += 1;
        Ok(())
    }

    /// Back to the configured initial state; counters are cleared.
    pub fn reset_to_initial(&mut self) {
        self.state = self.initial_state;
        self.covariance = StateMat3::identity();
        self.predictions = 0;
        self.updates = 0;
        self.resets = 0;
    }

    pub fn position(&self) -> (f64, f64, i32) {
        (self.state[0], self.state[1], self.floor())
    }

    pub fn floor(&self) -> i32 {
        self.state[2].round() as i32
    }

    pub fn covariance(&self) -> &StateMat3 {
        &self.covariance
    }

    pub fn get_state(&self) -> FilterState {
        let mut covariance = [[0.0; 3]; 3];
        for (r, row) in covariance.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = self.covariance[(r, c)];
            }
        }
        FilterState {
            x: self.state[0],
            y: self.state[1],
            floor: self.floor(),
            covariance,
            covariance_trace: self.covariance.trace(),
            predictions: self.predictions,
            updates: self.updates,
            resets: self.resets,
        }
    }
}

/// R must be symmetric positive definite.
fn check_measurement_noise(r: &PositionNoise) -> Result<(), FilterError> {
    if r.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::InvalidNoise("measurement noise override is not finite".into()));
    }
    if (r - r.transpose()).amax() > 1e-9 {
        return Err(FilterError::InvalidNoise("measurement noise override is not symmetric".into()));
    }
    let min_eigen = SymmetricEigen::new(*r).eigenvalues.min();
    if min_eigen <= 0.0 {
        return Err(FilterError::InvalidNoise(format!(
            "measurement noise override is not positive definite (min eigenvalue {:e})",
            min_eigen
        )));
    }
    Ok(())
}

fn check_covariance(p: &StateMat3) -> Result<(), FilterError> {
    if p.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::CovarianceNotPsd(f64::NAN));
    }
    let min_eigen = SymmetricEigen::new(*p).eigenvalues.min();
    if min_eigen < PSD_TOLERANCE {
        return Err(FilterError::CovarianceNotPsd(min_eigen));
    }
    Ok(())
}

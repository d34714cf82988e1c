use crate::types::{PositionDelta, StrideRecord};

/// Dead-reckoned path of one batch, starting at the local origin.
#[derive(Clone, Debug)]
pub struct PositionIntegrator {
    positions: Vec<(f64, f64)>,
    distance: f64,
}

impl Default for PositionIntegrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionIntegrator {
    pub fn new() -> Self {
        Self { positions: vec![(0.0, 0.0)], distance: 0.0 }
    }

    pub fn from_strides(strides: &[StrideRecord]) -> Self {
        let mut integrator = Self::new();
        for stride in strides {
            integrator.push(stride);
        }
        integrator
    }

    pub fn push(&mut self, stride: &StrideRecord) {
        let (x, y) = self.positions[self.positions.len() - 1];
        let s = stride.stride_length_m;
        self.positions.push((x + s * stride.heading_rad.cos(), y + s * stride.heading_rad.sin()));
        self.distance += s;
    }

    pub fn step_count(&self) -> usize {
        self.positions.len() - 1
    }

    /// Displacement of the last step, or zero with fewer than two steps.
    pub fn pdr_delta(&self) -> PositionDelta {
        if self.step_count() < 2 {
            return PositionDelta::ZERO;
        }
        let n = self.positions.len();
        let (x1, y1) = self.positions[n - 1];
        let (x0, y0) = self.positions[n - 2];
        PositionDelta::new(x1 - x0, y1 - y0)
    }

    /// Sum of every step in the batch.
    pub fn net_displacement(&self) -> PositionDelta {
        let (x, y) = self.positions[self.positions.len() - 1];
        PositionDelta::new(x, y)
    }

    pub fn trajectory(&self) -> &[(f64, f64)] {
        &self.positions
    }

    pub fn total_distance(&self) -> f64 {
        self.distance
    }
}

pub mod kalman_3d;

pub use kalman_3d::{FilterState, FusionFilter};

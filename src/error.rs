use thiserror::Error;

/// Recoverable problems with one IMU batch.
///
/// The PDR pipeline never lets these escape into the filter: a rejected batch
/// simply contributes a zero displacement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PdrError {
    #[error("Too few samples: {0} (need at least 2)")]
    TooFewSamples(usize),

    #[error("Non-positive batch duration: {0:.6}s")]
    NonPositiveDuration(f64),

    #[error("Timestamps not strictly increasing at sample {0}")]
    NonMonotonicTimestamps(usize),

    #[error("Non-finite sample at index {0}")]
    NonFiniteSample(usize),

    #[error("Batch starts at {start:.3}s, before previous batch end {previous_end:.3}s")]
    OutOfOrderBatch { start: f64, previous_end: f64 },
}

/// Failures of the position filter. These are never swallowed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Innovation covariance is singular")]
    SingularInnovation,

    #[error("Covariance is not positive semi-definite (min eigenvalue {0:.3e})")]
    CovarianceNotPsd(f64),

    #[error("Non-finite filter input: {0}")]
    NonFiniteInput(String),

    #[error("Invalid noise parameters: {0}")]
    InvalidNoise(String),
}

/// Errors surfaced by a tracking session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Filter failure: {0}")]
    Filter(#[from] FilterError),

    #[error("Invalid marker scan: {0}")]
    InvalidScan(String),

    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    #[error("Tracker lock poisoned")]
    LockPoisoned,
}

pub type TrackerResult<T> = Result<T, TrackerError>;

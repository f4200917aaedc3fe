use chrono::NaiveDateTime;
use thiserror::Error;

/// Invalid estimation inputs, rejected before any series work begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimateError {
    #[error("asset duration must be a positive number of hours, got {0}")]
    InvalidDuration(f64),

    #[error("throughput ratio must be a positive MWh per hour figure, got {0}")]
    InvalidThroughputRatio(f64),

    #[error("performance score must lie in [0, 1], got {0}")]
    InvalidPerformanceScore(f64),

    #[error("nameplate power must be a non-negative number of MW, got {0}")]
    InvalidPower(f64),

    #[error("window end {end} is before window start {start}")]
    InvalidWindow {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

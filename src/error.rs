//! Error types for SleepSense

use thiserror::Error;

/// Errors that can occur during detection, calibration and scoring
#[derive(Debug, Error)]
pub enum SleepError {
    /// A field required by the requested computation is missing or malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation was invoked in a state where its contract does not hold
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Not enough data points to compute a statistic
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Sample at {sample} is older than the newest buffered sample at {newest}")]
    OutOfOrderSample { sample: String, newest: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types for GridFlow

use thiserror::Error;

/// GridFlow error types
#[derive(Error, Debug)]
pub enum GridFlowError {
    /// Environment has no scheduler bound
    #[error("environment '{0}' has no scheduler bound")]
    NoScheduler(String),

    /// Required scheduler CLI tool is missing
    #[error("scheduler backend '{0}' is not available")]
    BackendUnavailable(String),

    /// Backend command failed with an unrecognized non-zero exit
    #[error("scheduler command failed (exit code {code:?}): {stderr}")]
    CommandFailure { code: Option<i32>, stderr: String },

    /// Backend reported a job state this adapter does not map
    #[error("unexpected job state '{0}' in scheduler output")]
    UnexpectedJobState(String),

    /// Backend output did not match the expected record structure
    #[error("malformed scheduler output: {0}")]
    MalformedOutput(String),

    /// Bounded lock acquisition exceeded its deadline
    #[error("failed to acquire document lock within {0:?}")]
    LockTimeout(std::time::Duration),

    /// Non-forced release without a successful acquisition
    #[error("document lock was never acquired by this instance")]
    LockNotHeld,

    /// Invalid hostname pattern
    #[error("invalid hostname pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using GridFlowError
pub type Result<T> = std::result::Result<T, GridFlowError>;

//! Error types for scan requests and the scan lifecycle.

use thiserror::Error;

/// Scan-level errors. Per-port network failures never surface here; they are
/// classified as closed ports by the prober.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Malformed host, port range or worker count. The scan never started.
    #[error("invalid scan request: {0}")]
    Validation(String),

    /// A scan is already active; the running scan is left untouched.
    #[error("a scan is already running")]
    AlreadyRunning,

    /// The supervisor task failed before producing a terminal status.
    #[error("scan aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

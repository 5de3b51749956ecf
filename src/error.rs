//! Error types for the job bus crate.

use thiserror::Error;

/// Errors that can occur when persisting, loading, or admitting jobs.
///
/// Malformed data read back from a storage medium is not an error: reads
/// fail open to an empty collection. Only availability failures (I/O, the
/// database rejecting an operation) and serialization failures surface here.
#[derive(Debug, Error)]
pub enum BusError {
    /// Reading or writing a slot file failed.
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A job record could not be serialized.
    #[error("Job serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The database medium rejected an operation.
    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),
}

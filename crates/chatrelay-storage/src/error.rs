use std::path::PathBuf;

use thiserror::Error;

/// Persistence error types
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The on-disk structure is not a list of `{role, content}` records.
    #[error("Corrupt conversation file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Writing the temp file or the atomic replace failed.
    #[error("Failed to write conversation file {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for persistence operations
pub type Result<T> = std::result::Result<T, PersistenceError>;

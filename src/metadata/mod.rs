pub mod gallery;
pub mod source;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read metadata: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed metadata json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gallery api error: {0}")]
    Api(String),
    #[error("invalid gallery metadata: {0}")]
    Invalid(String),
    #[error("gallery id mismatch: expected {expected}, got {found}")]
    GidMismatch { expected: i64, found: i64 },
    #[error("metadata fetch was cancelled")]
    Cancelled,
}

use thiserror::Error;

use crate::metadata::MetadataError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(#[source] rusqlite::Error),

    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("invalid search pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to decode column '{column}': {source}")]
    Decode {
        column: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("schema revision mismatch for table '{table}': found {found}, expected {expected}")]
    SchemaRevisionMismatch {
        table: &'static str,
        found: i64,
        expected: i64,
    },

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("no folder with fid {0}")]
    UnknownFolder(i64),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

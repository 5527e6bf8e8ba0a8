//! Error types for the SCIP index core.
//!
//! Internal plumbing uses `anyhow::Result`; the five components' public entry
//! points (`build`, the query operations, `verify`, the facade operations)
//! convert into this crate's own `CoreError` at their boundary.

use crate::verify::VerificationResult;

/// Error kinds surfaced across the reader, builder, query engine, and facade.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Depth out of range, unknown search mode, malformed symbol name.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Malformed protobuf; aborts the ETL.
    #[error("failed to decode SCIP index at {path}: {source}")]
    DecodeError {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// DB I/O, disk-full, permissions.
    #[error("storage error: {0}")]
    StorageError(#[source] anyhow::Error),

    /// The store does not match the protobuf; caller decides whether to keep it.
    #[error("verification failed with {} error(s)", .0.total_errors)]
    VerificationFailure(Box<VerificationResult>),

    /// `traceCallChain` exceeded its wall-clock budget.
    #[error("query timed out: {0}")]
    Timeout(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::StorageError(err.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

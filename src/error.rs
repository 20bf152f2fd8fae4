//! Error taxonomy for the indexing and retrieval pipeline.
//!
//! Fatal errors ([`IndexError::Connection`], [`IndexError::Schema`],
//! [`IndexError::Embedding`]) abort a rebuild. [`IndexError::MalformedRecord`]
//! is recovered per record by the ingestion pipeline.

use std::path::PathBuf;

/// Result alias used by the library modules.
pub type Result<T, E = IndexError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The vector store could not be opened at the given path.
    #[error("failed to open vector store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A backend call failed after the store was opened.
    #[error("vector store error: {0}")]
    Connection(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared schema is inconsistent, or a row violates it.
    #[error("schema error: {0}")]
    Schema(String),

    /// A single source record could not be read or does not fit the schema.
    #[error("malformed record {path}: {reason}")]
    MalformedRecord { path: PathBuf, reason: String },

    /// The embedding backend failed or returned a malformed result.
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("invalid collection name {0:?}: expected [A-Za-z_][A-Za-z0-9_]*, at most 255 chars")]
    InvalidName(String),

    /// Operation attempted in a lifecycle state that does not allow it.
    #[error("cannot {operation} collection {name}: state is {state}")]
    InvalidState {
        name: String,
        state: String,
        operation: &'static str,
    },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

impl IndexError {
    /// Whether the error is recovered locally (skip and continue) rather than
    /// aborting the run.
    pub fn is_per_record(&self) -> bool {
        matches!(self, Self::MalformedRecord { .. })
    }

    /// Classify a failure from a statement that writes or scores vectors.
    /// Rows the backend rejects for their shape (CHECK constraints, sqlite-vec
    /// dimension mismatches) are schema errors; anything else stays a
    /// connection error.
    pub(crate) fn from_backend(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            let dimension_mismatch = message
                .as_deref()
                .is_some_and(|m| m.to_ascii_lowercase().contains("dimension mis"));
            if failure.code == rusqlite::ErrorCode::ConstraintViolation || dimension_mismatch {
                return Self::Schema(format!(
                    "store rejected row: {}",
                    message.as_deref().unwrap_or("constraint violation")
                ));
            }
        }
        Self::Connection(err)
    }
}

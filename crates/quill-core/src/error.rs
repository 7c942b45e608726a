//! Error types for quill-core

use thiserror::Error;

/// Result type alias using quill-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quill-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Entity or event not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A compare-and-swap write lost against a concurrent writer
    #[error("Stale version for {entity_id}: expected {expected}")]
    StaleVersion {
        /// Entity whose version moved
        entity_id: String,
        /// Version the writer read before deciding
        expected: i64,
    },

    /// The entity belongs to a different account
    #[error("Entity {0} belongs to another account")]
    Forbidden(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StaleVersion { .. } | Self::Database(_) | Self::LibSql(_)
        )
    }
}

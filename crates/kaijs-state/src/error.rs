//! Error types for the state persistence layer.

use thiserror::Error;

/// Errors that can occur in the state persistence layer.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A document breached the storage size ceiling
    #[error("document of {size} bytes exceeds the 16 MiB limit")]
    DocumentTooLarge { size: usize },

    /// A bulk index request reported item failures
    #[error("bulk index request failed: {0}")]
    Bulk(String),

    /// Document not found where one must exist
    #[error("document not found: {0}")]
    NotFound(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

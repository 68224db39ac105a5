//! Error types for graph storage and snapshot operations.
//!
//! Absence is never an error for point lookups (they return `Option`). The
//! variants here cover input validation, operations that require an entity
//! to exist, and failures bubbling up from the backing store.

use thiserror::Error;

/// Errors produced by graph storage and temporal operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A pagination cursor could not be decoded.
    #[error("invalid pagination cursor: {0}")]
    InvalidCursor(String),

    /// A tag filter key cannot be used for matching.
    #[error("invalid tag filter key: {0:?}")]
    InvalidTagFilter(String),

    /// A retention policy limit is out of range.
    #[error("invalid retention limit: {0}")]
    InvalidRetention(String),

    /// A snapshot referenced by an operation does not exist.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// A group referenced by a membership operation does not exist.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// An immutable record already exists under this id.
    #[error("record already exists: {0}")]
    Conflict(String),

    /// A stored value could not be decoded back into its domain type.
    #[error("corrupt stored value in {column}: {value:?}")]
    Corrupt { column: &'static str, value: String },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The relational backend reported a failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result alias used throughout the graph crate.
pub type Result<T> = std::result::Result<T, GraphError>;

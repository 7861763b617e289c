//! Error types for plans storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// A uniqueness rule would be broken (second default plan, duplicate slug).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A concurrent transaction won the race for the same rows; retry with fresh reads.
    #[error("transaction conflict on {key}")]
    Conflict {
        /// The contended key.
        key: String,
    },
}

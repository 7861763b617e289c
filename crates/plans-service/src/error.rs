//! Service error types.

use plans_core::PlansError;
use plans_store::StoreError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors surfaced by the plans engine.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Domain error: configuration, validation, order state, missing entity.
    #[error(transparent)]
    Plans(#[from] PlansError),

    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An event subscriber failed after the state change was committed.
    #[error("subscriber for {event} failed: {message}")]
    Subscriber {
        /// Signal name of the event.
        event: &'static str,
        /// Error reported by the subscriber.
        message: String,
    },

    /// Outbound HTTP client could not be created.
    #[error("http client error: {0}")]
    HttpClient(String),
}

impl ServiceError {
    /// Whether a retry with fresh reads may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }

    /// Shorthand for a missing entity.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::Plans(PlansError::not_found(entity, id))
    }
}

impl From<plans_core::ValidationError> for ServiceError {
    fn from(err: plans_core::ValidationError) -> Self {
        Self::Plans(PlansError::Validation(err))
    }
}

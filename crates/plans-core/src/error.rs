//! Error types for the plans engine core.

use std::collections::BTreeMap;
use std::fmt;

use crate::ids::IdError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, PlansError>;

/// Errors that can occur in core plans operations.
#[derive(Debug, thiserror::Error)]
pub enum PlansError {
    /// A setting is missing or inconsistent (unknown currency, issuer outside the EU table…).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A quota or billing-data check failed.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The plan has no pricing, so it has no day cost.
    #[error("plan has no pricing: {plan}")]
    PlanHasNoPricing {
        /// Slug of the offending plan.
        plan: String,
    },

    /// The order can no longer be paid.
    #[error("order {order_id} expired and cannot be paid")]
    OrderExpired {
        /// The order that expired.
        order_id: String,
    },

    /// The order was already completed.
    #[error("order {order_id} already completed")]
    OrderAlreadyCompleted {
        /// The order that was completed before.
        order_id: String,
    },

    /// The order is not in a state that allows the requested transition.
    #[error("invalid order transition for {order_id}: {from} -> {to}")]
    InvalidOrderTransition {
        /// The order.
        order_id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Entity lookup failed.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The invoice number template could not be parsed or rendered.
    #[error("template error: {0}")]
    Template(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl PlansError {
    /// Shorthand for a [`PlansError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// A user-facing validation failure with named parameters.
///
/// The message may reference parameters as `{name}`; [`ValidationError::render`]
/// substitutes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Message template.
    pub message: String,
    /// Named parameters referenced by the message.
    pub params: BTreeMap<String, String>,
}

impl ValidationError {
    /// Create a validation error without parameters.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            params: BTreeMap::new(),
        }
    }

    /// Attach a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Render the message with its parameters substituted.
    #[must_use]
    pub fn render(&self) -> String {
        self.params
            .iter()
            .fold(self.message.clone(), |message, (name, value)| {
                message.replace(&format!("{{{name}}}"), value)
            })
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_substitutes_params() {
        let err = ValidationError::new("Too many projects ({total_count}), limit is {quota}")
            .with_param("quota", 3)
            .with_param("total_count", 5);
        assert_eq!(err.render(), "Too many projects (5), limit is 3");
        assert_eq!(err.to_string(), err.render());
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let err = ValidationError::new("limit {quota}");
        assert_eq!(err.render(), "limit {quota}");
    }
}

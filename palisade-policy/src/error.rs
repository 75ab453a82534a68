//! Policy compiler error types

use palisade_schema::PolicyOp;
use thiserror::Error;

/// Errors surfaced while compiling a schema's access policies.
///
/// Unrepresentable rule expressions are NOT errors; they degrade to opaque
/// placeholders during lowering. These variants cover genuine input problems
/// the schema front-end should have prevented.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A relation points at a model the schema does not declare
    #[error("relation `{relation}` on model `{model}` targets unknown model `{target}`")]
    UnknownRelationTarget {
        model: String,
        relation: String,
        target: String,
    },

    /// A field-level rule was declared for an operation fields don't support
    #[error("field `{model}.{field}` declares a rule for `{op}`; field rules support read and update only")]
    InvalidFieldRuleOperation {
        model: String,
        field: String,
        op: PolicyOp,
    },

    /// Internal compiler error
    #[error("policy compiler error: {message}")]
    Internal { message: String },
}

impl PolicyError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type alias for policy compilation
pub type Result<T> = std::result::Result<T, PolicyError>;

//! Error types for the RLS crate.

use thiserror::Error;

/// Errors that can occur while producing RLS predicates.
#[derive(Debug, Error)]
pub enum RlsError {
    /// The policy catalog could not be read.
    #[error("failed to load policies for {table}: {reason}")]
    PolicyFetch { table: String, reason: String },

    /// A stored policy expression is malformed.
    #[error("policy {policy} on {table} has an invalid expression: {reason}")]
    InvalidExpression {
        table: String,
        policy: String,
        reason: String,
    },

    /// A caller value cannot be embedded in a SQL literal.
    #[error("auth context value for {placeholder} cannot be used in a policy")]
    InvalidContextValue { placeholder: String },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

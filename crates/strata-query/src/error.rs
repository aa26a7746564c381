//! Error types for request parsing and SQL generation.

use thiserror::Error;

/// Errors raised while turning a request into SQL.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed `select=`, filter or `order=` syntax.
    #[error("failed to parse {context} near '{fragment}': {reason}")]
    Parse {
        context: &'static str,
        fragment: String,
        reason: String,
    },

    /// Selection or filter nesting beyond the configured ceiling.
    #[error("{context} nesting exceeds the maximum depth of {max}")]
    DepthExceeded { context: &'static str, max: usize },

    /// A query parameter has an invalid value.
    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The `Range` header cannot be satisfied.
    #[error("invalid range '{0}'")]
    InvalidRange(String),

    /// The `Accept` header names no supported representation.
    #[error("none of the requested media types are supported: {0}")]
    NotAcceptable(String),

    /// The request body does not describe rows.
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl QueryError {
    pub(crate) fn parse(
        context: &'static str,
        fragment: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        QueryError::Parse {
            context,
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }
}

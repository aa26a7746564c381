//! Error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use strata_query::QueryError;
use strata_runtime::EngineError;
use thiserror::Error;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Failure inside the engine.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Identity headers that cannot be read.
    #[error("invalid authentication header {header}: {reason}")]
    InvalidIdentity { header: &'static str, reason: String },

    /// The caller's role may not use this endpoint.
    #[error("role '{0}' is not allowed to perform this operation")]
    Forbidden(String),

    /// Response serialization failed.
    #[error("failed to encode response: {0}")]
    Encode(#[from] anyhow::Error),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Engine(err.into())
    }
}

/// JSON error body. Never carries SQL text.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(err) => {
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::InvalidIdentity { .. } => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            ApiError::Engine(err) => ErrorBody {
                code: err.code().to_string(),
                message: err.public_message(),
                details: err.details(),
                hint: err.hint(),
            },
            ApiError::InvalidIdentity { .. } => ErrorBody {
                code: "PGRST301".to_string(),
                message: self.to_string(),
                details: None,
                hint: None,
            },
            ApiError::Forbidden(_) => ErrorBody {
                code: "42501".to_string(),
                message: self.to_string(),
                details: None,
                hint: None,
            },
            ApiError::Encode(_) => ErrorBody {
                code: "PGRST500".to_string(),
                message: "internal server error".to_string(),
                details: None,
                hint: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

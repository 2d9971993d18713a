use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed")]
    Auth,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    ReadOnly(String),

    #[error("database error: {message}")]
    Database {
        message: String,
        detail: Option<String>,
        hint: Option<String>,
    },

    #[error("database unavailable: {0}")]
    Connection(String),

    #[error("query timed out after {0}s")]
    Timeout(u64),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Auth => StatusCode::UNAUTHORIZED,
            ServiceError::InvalidRequest(_) | ServiceError::ReadOnly(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Database { .. } => StatusCode::BAD_GATEWAY,
            ServiceError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if !matches!(
            self,
            ServiceError::InvalidRequest(_) | ServiceError::ReadOnly(_) | ServiceError::Auth
        ) {
            error!(error = %self, "request failed");
        }

        let (detail, hint) = match &self {
            ServiceError::Database { detail, hint, .. } => (detail.clone(), hint.clone()),
            _ => (None, None),
        };

        let body = ErrorBody {
            error: self.to_string(),
            detail,
            hint,
        };
        (status, Json(body)).into_response()
    }
}

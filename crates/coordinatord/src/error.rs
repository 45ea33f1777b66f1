//! Maps every internal error into its HTTP status/body representation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use coordinator_security::{AuthError, CipherError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Auth(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "unhandled internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<coordinator_db::DbError> for ApiError {
    fn from(e: coordinator_db::DbError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<coordinator_core::CoreError> for ApiError {
    fn from(e: coordinator_core::CoreError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<coordinator_transport::TransportError> for ApiError {
    fn from(e: coordinator_transport::TransportError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<CipherError> for ApiError {
    fn from(e: CipherError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<crate::identity::IdentityError> for ApiError {
    fn from(e: crate::identity::IdentityError) -> Self {
        ApiError::Internal(e.into())
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Domain error taxonomy.
///
/// `InvalidToken` deliberately covers both never-existed and revoked-family
/// credentials so a response cannot reveal whether reuse detection fired.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Token reuse detected")]
    ReuseDetected,

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            code: &'static str,
        }

        let (status, code, message, retry_after) = match self {
            ServiceError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "Invalid token".to_string(),
                None,
            ),
            ServiceError::ExpiredToken => (
                StatusCode::UNAUTHORIZED,
                "expired_token",
                "Token expired".to_string(),
                None,
            ),
            ServiceError::ReuseDetected => (
                StatusCode::FORBIDDEN,
                "reuse_detected",
                "Token reuse detected; session family revoked".to_string(),
                None,
            ),
            ServiceError::RateLimitExceeded { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_exceeded",
                "Rate limit exceeded. Please retry later.".to_string(),
                Some(retry_after_secs),
            ),
            ServiceError::Validation(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg, None)
            }
            ServiceError::Storage(err) => {
                tracing::error!(error = %err, "Storage failure; failing closed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    "Storage unavailable".to_string(),
                    None,
                )
            }
            ServiceError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let mut res = (
            status,
            Json(ErrorBody {
                error: message,
                code,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

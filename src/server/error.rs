//! Server Error Types
//!
//! Error type for the HTTP surface and its conversion to responses.
//! Security outcomes map to 401/403; anything unexpected maps to 500 with
//! a generic message; internal error text is logged, never leaked beyond
//! the structured description field.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced at the HTTP boundary
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request carries no valid identity
    #[error("Unauthorized")]
    Unauthorized,

    /// The identity is valid but not allowed
    #[error("Forbidden")]
    Forbidden,

    /// Unexpected internal error; detail is logged, not returned
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error (listener setup, accept)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub description: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str, &'static str) {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized",
                "You are not authorized to access this resource.",
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Forbidden",
                "You are not allowed to access this resource.",
            ),
            ApiError::Internal(_) | ApiError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal Server Error",
                "An unexpected error occurred.",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, description) = self.parts();
        let request_id = uuid::Uuid::new_v4().to_string();

        tracing::error!(
            request_id = %request_id,
            error_code = %code,
            error_message = %self,
            "request failed"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
                description: description.to_string(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for server operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Unauthorized.parts().0, StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.parts().0, StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Internal("database exploded".to_string()).parts().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_not_leaked() {
        let (_, _, message, description) =
            ApiError::Internal("secret connection string".to_string()).parts();
        assert!(!message.contains("secret"));
        assert!(!description.contains("secret"));
    }
}

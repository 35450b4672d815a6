//! The `{success, message, data}` envelope and the error-to-status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::application::{AuthError, LedgerError};

/// JSON body of every API response.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// A failed request: status code plus the message shown to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Authentication required")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Unauthorized")
    }

    /// Log the cause and hide it from the client.
    pub fn server_error(cause: &anyhow::Error) -> Self {
        error!(error = ?cause, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            message: Some(self.message),
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount(message) => ApiError::bad_request(message),
            LedgerError::Unauthorized => ApiError::forbidden(),
            LedgerError::AccountClosed => ApiError::new(StatusCode::CONFLICT, err.to_string()),
            LedgerError::InsufficientFunds { .. } => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "Insufficient funds")
            }
            // Retried inside the service; reaching here means the retries ran out
            LedgerError::Conflict => {
                ApiError::server_error(&anyhow::anyhow!("unresolved storage conflict"))
            }
            LedgerError::StorageFailure(cause) => ApiError::server_error(&cause),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidInput(_) => ApiError::bad_request(err.to_string()),
            AuthError::AlreadyExists => ApiError::new(StatusCode::CONFLICT, err.to_string()),
            AuthError::InvalidCredentials => {
                ApiError::new(StatusCode::UNAUTHORIZED, err.to_string())
            }
            AuthError::Unauthenticated => ApiError::unauthenticated(),
            AuthError::Locked { until } => ApiError::new(
                StatusCode::LOCKED,
                format!(
                    "Too many failed attempts, try again after {}",
                    until.to_rfc3339()
                ),
            ),
            AuthError::Forbidden => ApiError::forbidden(),
            AuthError::UserNotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "User not found"),
            AuthError::StorageFailure(cause) => ApiError::server_error(&cause),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::server_error(&err)
    }
}

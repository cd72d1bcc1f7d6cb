//! Error types for the Newsstand server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bigdecimal::BigDecimal;

use crate::gateway::GatewayError;

/// Seconds a client should wait before retrying after a gateway outage.
const GATEWAY_RETRY_AFTER_SECS: u64 = 5;

/// Why a download token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("download token not found")]
    Unknown,

    #[error("download token already used")]
    Used,

    #[error("download token expired")]
    Expired,
}

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: BigDecimal,
        requested: BigDecimal,
    },

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(#[from] CredentialError),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::GatewayUnavailable(_))
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::GatewayUnavailable(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retryable = self.is_retryable();
        let mut response = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            AppError::InvalidAmount(msg) => {
                (StatusCode::BAD_REQUEST, format!("Invalid amount: {}", msg)).into_response()
            }
            AppError::InsufficientBalance { available, requested } => (
                StatusCode::BAD_REQUEST,
                format!(
                    "Insufficient balance. Available: {}, requested: {}",
                    available, requested
                ),
            )
                .into_response(),
            AppError::GatewayUnavailable(msg) => {
                tracing::warn!("Payment gateway unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Payment gateway unavailable, please retry",
                )
                    .into_response()
            }
            AppError::InvalidCredential(reason) => {
                let status = match reason {
                    CredentialError::Unknown => StatusCode::NOT_FOUND,
                    CredentialError::Used | CredentialError::Expired => StatusCode::GONE,
                };
                (status, reason.to_string()).into_response()
            }
            AppError::InvalidStateTransition { from, to } => (
                StatusCode::CONFLICT,
                format!("Cannot move from {} to {}", from, to),
            )
                .into_response(),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        };

        if retryable {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from(GATEWAY_RETRY_AFTER_SECS),
            );
        }
        response
    }
}

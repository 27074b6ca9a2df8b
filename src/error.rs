use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No ceremony in progress: {0}")]
    InvalidCeremonyState(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Unknown user or authenticator")]
    UnknownAuthenticator,

    #[error("Invalid Sec-Fetch-Dest header")]
    InvalidRequestContext,

    #[error("Invalid Origin")]
    InvalidOrigin,

    #[error("Invalid account_id")]
    AccountMismatch,

    #[error("Store conflict: {0}")]
    StoreConflict(String),

    #[error("Token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error body in the FedCM wire shape
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidCeremonyState(msg) => {
                tracing::warn!("Ceremony state missing: {}", msg);
                (
                    StatusCode::BAD_REQUEST,
                    "User or challenge is missing".to_string(),
                )
            }
            AppError::VerificationFailed(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UnknownAuthenticator => (
                StatusCode::BAD_REQUEST,
                "Unknown User or Authenticator".to_string(),
            ),
            AppError::InvalidRequestContext => (
                StatusCode::BAD_REQUEST,
                "Invalid Sec-Fetch-Dest header".to_string(),
            ),
            AppError::InvalidOrigin => (StatusCode::BAD_REQUEST, "Invalid Origin".to_string()),
            AppError::AccountMismatch => {
                (StatusCode::BAD_REQUEST, "Invalid account_id".to_string())
            }
            AppError::StoreConflict(msg) => {
                tracing::warn!("Store conflict: {}", msg);
                (StatusCode::CONFLICT, "Concurrent update, retry".to_string())
            }
            AppError::Jwt(e) => {
                tracing::error!("Token error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Token error".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "IO error".to_string())
            }
        };

        let body = Json(ErrorBody { error: message });
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

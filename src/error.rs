use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    ProfileNotFound(String),
    OriginalNotFound(String),
    PostNotFound(String),
    NotFound(String),
    InvalidArgument(String),
    AlreadyExists(String),
    PreconditionFailed(String),
    // Transient infrastructure failure, safe to retry
    StoreUnavailable(String),
    PartialChunkFailure { failed: usize, total: usize },
    MalformedDocument(String),
    SerializationError(String),
    ConfigurationError(String),
    Internal(String),
}

impl AppError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ProfileNotFound(msg) => write!(f, "Profile not found: {}", msg),
            AppError::OriginalNotFound(msg) => write!(f, "Original post not found: {}", msg),
            AppError::PostNotFound(msg) => write!(f, "Post not found: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            AppError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            AppError::PreconditionFailed(msg) => write!(f, "Precondition failed: {}", msg),
            AppError::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            AppError::PartialChunkFailure { failed, total } => {
                write!(f, "Partial chunk failure: {} of {} chunks failed", failed, total)
            }
            AppError::MalformedDocument(msg) => write!(f, "Malformed document: {}", msg),
            AppError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::ProfileNotFound(_)
            | AppError::OriginalNotFound(_)
            | AppError::PostNotFound(_)
            | AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::AlreadyExists(_) | AppError::PreconditionFailed(_) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable".to_string())
            }
            AppError::PartialChunkFailure { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::MalformedDocument(msg) | AppError::SerializationError(msg) => {
                tracing::error!("Document error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::ConfigurationError(msg) | AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

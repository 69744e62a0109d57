use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

pub const UPSTREAM_UNAVAILABLE_MSG: &str =
    "Could not connect to the answer service. Is it running?";

/// Everything a request can fail with. Converted to a status code and a
/// short `{"error": ...}` body at the request boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Returned both for chats that do not exist and for chats owned by
    /// someone else, so callers cannot probe for other users' chats.
    #[error("Chat not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("answer service unreachable: {0}")]
    UpstreamUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Chat not found".to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::UpstreamUnavailable(detail) => {
                error!("Answer service unreachable: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    UPSTREAM_UNAVAILABLE_MSG.to_string(),
                )
            }
            ApiError::Database(e) => {
                error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_string())
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

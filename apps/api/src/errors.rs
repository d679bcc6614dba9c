use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::chat::error::ChatError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chat error: {0}")]
    Chat(String),
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyInput => AppError::Validation(err.to_string()),
            ChatError::Busy | ChatError::Unbound => AppError::Conflict(err.to_string()),
            ChatError::UnknownMessage(_) => AppError::NotFound(err.to_string()),
            // Generation failures are turned into message content by the controller and
            // never reach a handler; map them anyway so nothing is silently lost.
            other => AppError::Chat(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                msg.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Chat(msg) => {
                tracing::error!("Chat error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "CHAT_ERROR",
                    "The generation service failed".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_chat_rejections_map_to_client_errors() {
        let status = |e: ChatError| AppError::from(e).into_response().status();
        assert_eq!(status(ChatError::EmptyInput), StatusCode::BAD_REQUEST);
        assert_eq!(status(ChatError::Busy), StatusCode::CONFLICT);
        assert_eq!(status(ChatError::Unbound), StatusCode::CONFLICT);
        assert_eq!(status(ChatError::UnknownMessage(Uuid::new_v4())), StatusCode::NOT_FOUND);
        assert_eq!(status(ChatError::EmptyReply), StatusCode::BAD_GATEWAY);
    }
}

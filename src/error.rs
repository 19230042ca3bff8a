use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::recurrence::RecurrenceError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unsupported transition: {0}")]
    UnsupportedTransition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Recurrence(#[from] RecurrenceError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::UnsupportedTransition(_) => (StatusCode::CONFLICT, "UNSUPPORTED_TRANSITION"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Recurrence(e) => match e {
                RecurrenceError::UnsupportedFrequency(_) => {
                    (StatusCode::BAD_REQUEST, "UNSUPPORTED_FREQUENCY")
                }
                RecurrenceError::MalformedRule(_) => (StatusCode::BAD_REQUEST, "MALFORMED_RULE"),
                // Stored series row without a usable rule.
                RecurrenceError::MissingOrInvalidRule { .. } => {
                    (StatusCode::CONFLICT, "MISSING_OR_INVALID_RULE")
                }
                RecurrenceError::InvalidWindow(_) => (StatusCode::BAD_REQUEST, "INVALID_WINDOW"),
                RecurrenceError::MissingField(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            },
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::NotFound(msg)
            | AppError::UnsupportedTransition(msg)
            | AppError::Validation(msg) => msg.clone(),
            AppError::Recurrence(_) => self.to_string(),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "A database error occurred".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                "An internal error occurred".to_string()
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::constants::ERR_INVALID_USERNAME;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Secure random source failed: {0}")]
    RandomSource(#[from] rand::Error),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid username")]
    InvalidUsername,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Authorization required")]
    Unauthorized,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Implement IntoResponse to convert AppError into HTTP responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::RandomSource(ref e) => {
                tracing::error!("Random source error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::PasswordHash(ref e) => {
                tracing::error!("Password hashing error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::TaskJoin(ref e) => {
                tracing::error!("Task join error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::UserAlreadyExists => (StatusCode::BAD_REQUEST, "User already exists"),
            AppError::InvalidUsername => (StatusCode::BAD_REQUEST, ERR_INVALID_USERNAME),
            // Unknown users and wrong passwords look the same to the caller
            AppError::UserNotFound | AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid username or password")
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authorization required"),
            AppError::InvalidInput(ref msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

/// Result type alias for application results
pub type Result<T> = std::result::Result<T, AppError>;

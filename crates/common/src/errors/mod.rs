//! Error types for Cinema services
//!
//! One taxonomy shared by the extraction, transport, materialization and
//! voting paths:
//! - Per-item / per-message failures (`TransientFetch`, `Decode`) are
//!   absorbed by the loops that produce them
//! - Per-batch failures (`Transport`, `Persistence`) drop or abort the batch
//! - Store-facing classification (`NotFound`, `InvalidInput`, `Unexpected`)
//!   is what the HTTP layer maps onto status codes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors (1xxx)
    InvalidInput,

    // Authentication errors (2xxx)
    Unauthorized,

    // Resource errors (4xxx)
    NotFound,

    // State errors (5xxx)
    InvalidState,

    // Store errors (7xxx)
    DatabaseError,
    PersistenceError,

    // Upstream / transport errors (8xxx)
    TransientFetchError,
    DecodeError,
    TransportError,

    // Internal errors (9xxx)
    Unexpected,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 1001,

            ErrorCode::Unauthorized => 2001,

            ErrorCode::NotFound => 4001,

            ErrorCode::InvalidState => 5001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::PersistenceError => 7002,

            ErrorCode::TransientFetchError => 8001,
            ErrorCode::DecodeError => 8002,
            ErrorCode::TransportError => 8003,

            ErrorCode::Unexpected => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Extraction errors
    #[error("Fetch failed for source id {id}: {message}")]
    TransientFetch { id: i64, message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    // Materialization errors
    #[error("Persistence error during {step}: {message}")]
    Persistence { step: String, message: String },

    // Vote aggregate errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    // Store-facing classification
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Unexpected error: {message}")]
    Unexpected { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Build a `Persistence` error naming the step that failed
    pub fn persistence(step: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AppError::Persistence {
            step: step.into(),
            message: err.to_string(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::TransientFetch { .. } => ErrorCode::TransientFetchError,
            AppError::Decode { .. } => ErrorCode::DecodeError,
            AppError::Transport { .. } => ErrorCode::TransportError,
            AppError::Persistence { .. } => ErrorCode::PersistenceError,
            AppError::InvalidState { .. } => ErrorCode::InvalidState,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppError::Unexpected { .. } => ErrorCode::Unexpected,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::InvalidInput { .. } | AppError::Decode { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::InvalidState { .. } => StatusCode::CONFLICT,

            // 500 Internal Server Error
            AppError::Persistence { .. }
            | AppError::Unexpected { .. }
            | AppError::Database(_)
            | AppError::Configuration { .. }
            | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::TransientFetch { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::Transport { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Map a store error onto the store-facing classification.
///
/// Missing rows become `NotFound`, constraint violations become
/// `InvalidInput`, everything else is `Unexpected`.
pub fn classify_db_error(err: DbErr, resource_type: &str, id: impl ToString) -> AppError {
    if matches!(err, DbErr::RecordNotFound(_)) {
        return AppError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        };
    }

    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message))
        | Some(SqlErr::ForeignKeyConstraintViolation(message)) => {
            AppError::InvalidInput { message }
        }
        _ => AppError::Unexpected {
            message: err.to_string(),
        },
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Transport {
            message: err.to_string(),
        }
    }
}

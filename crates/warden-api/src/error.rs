//! API error handling
//!
//! `AppError` is the only place errors become HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;
use warden_core::WardenError;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details, e.g. per-field validation messages
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    /// Malformed input, with field-level detail
    Validation(serde_json::Value),
    /// Username or email already registered
    Duplicate(String),
    InvalidCredentials,
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Duplicate(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::InvalidCredentials | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Validation(details) => {
                ApiError::new("VALIDATION_ERROR", "Invalid request").with_details(details)
            }
            AppError::Duplicate(msg) => ApiError::new("DUPLICATE", msg),
            AppError::InvalidCredentials => {
                ApiError::new("INVALID_CREDENTIALS", "Invalid credentials")
            }
            AppError::Unauthorized(msg) => ApiError::new("UNAUTHORIZED", msg),
            AppError::BadRequest(msg) => ApiError::new("BAD_REQUEST", msg),
            AppError::NotFound(msg) => ApiError::new("NOT_FOUND", msg),
            AppError::ServiceUnavailable(msg) => {
                error!(reason = %msg, "Dependency unavailable");
                ApiError::new("SERVICE_UNAVAILABLE", "Service temporarily unavailable")
            }
            AppError::Internal(msg) => {
                // Details stay in the log
                error!(reason = %msg, "Internal error");
                ApiError::new("INTERNAL_ERROR", "Internal server error")
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<WardenError> for AppError {
    fn from(err: WardenError) -> Self {
        match err {
            WardenError::NotFound(msg) => AppError::NotFound(msg),
            err @ WardenError::Duplicate { .. } => AppError::Duplicate(err.to_string()),
            WardenError::ValidationError(msg) => AppError::BadRequest(msg),
            WardenError::StoreUnavailable(msg) => AppError::ServiceUnavailable(msg),
            WardenError::DatabaseError(msg) => AppError::Internal(format!("Database error: {msg}")),
            WardenError::MailError(msg) => AppError::Internal(format!("Mail error: {msg}")),
            WardenError::ConfigError(msg) => {
                AppError::Internal(format!("Configuration error: {msg}"))
            }
            WardenError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages: Vec<String> = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                (field.to_string(), serde_json::json!(messages))
            })
            .collect::<serde_json::Map<_, _>>();

        AppError::Validation(serde_json::Value::Object(details))
    }
}

//! Unified application error model and HTTP mapping.
//! Handlers and the session lifecycle return `AppError`; stores return `StoreError`,
//! which folds into `AppError::StoreUnavailable` at the boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::{Display, Formatter};

/// Why a credential check was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NotFound,
    BadPassword,
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Same text for both so clients cannot tell which logins exist.
        match self {
            RejectionReason::NotFound | RejectionReason::BadPassword => f.write_str("Incorrect username or password"),
        }
    }
}

/// A single field-level validation failure, passed to clients verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    AuthRejected { reason: RejectionReason },
    Unauthorized,
    ValidationFailed { errors: Vec<FieldError> },
    StoreUnavailable { message: String },
    SessionDestroyFailed { message: String },
    UserInput { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::AuthRejected { .. } => "auth_rejected",
            AppError::Unauthorized => "unauthorized",
            AppError::ValidationFailed { .. } => "validation_failed",
            AppError::StoreUnavailable { .. } => "store_unavailable",
            AppError::SessionDestroyFailed { .. } => "session_destroy_failed",
            AppError::UserInput { code, .. } | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            AppError::AuthRejected { reason } => reason.to_string(),
            AppError::Unauthorized => "Unauthorized".to_string(),
            AppError::ValidationFailed { errors } => errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; "),
            AppError::StoreUnavailable { message }
            | AppError::SessionDestroyFailed { message }
            | AppError::UserInput { message, .. }
            | AppError::Internal { message, .. } => message.clone(),
        }
    }

    pub fn user<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }
    pub fn store<S: Into<String>>(msg: S) -> Self { AppError::StoreUnavailable { message: msg.into() } }
    pub fn validation(errors: Vec<FieldError>) -> Self { AppError::ValidationFailed { errors } }

    /// Map to HTTP status code.
    ///
    /// Auth and validation failures are reported in the body with `success:false`,
    /// so they keep a 200 status; clients branch on `success`.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::AuthRejected { .. } => 200,
            AppError::Unauthorized => 200,
            AppError::ValidationFailed { .. } => 200,
            AppError::SessionDestroyFailed { .. } => 200,
            AppError::UserInput { .. } => 400,
            AppError::StoreUnavailable { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }

    /// JSON body in the shape every endpoint uses for failures.
    pub fn to_body(&self) -> serde_json::Value {
        match self {
            AppError::ValidationFailed { errors } => json!({ "success": false, "errors": errors }),
            AppError::SessionDestroyFailed { .. } => json!({ "success": false }),
            other => json!({ "success": false, "errors": [other.message()] }),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = self.code_str(), "request failed: {}", self.message());
        }
        (status, Json(self.to_body())).into_response()
    }
}

/// Failure raised by a session, user, or resource store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("record not found: {0}")]
    Missing(String),

    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StoreUnavailable { message: err.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

// ─── Error taxonomy ──────────────────────────────────────────────

/// Category an error is tracked under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Client-caused, 4xx
    ValidationError,
    /// Backend-caused, 5xx
    DatabaseError,
    /// Anything not classified otherwise
    UnhandledException,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::DatabaseError => "DatabaseError",
            Self::UnhandledException => "UnhandledException",
        }
    }

    /// Fallback classification for failed responses that carry no report.
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_client_error() {
            Self::ValidationError
        } else {
            Self::UnhandledException
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attached to error responses as an extension so the interceptor can
/// forward the details to the error tracker.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub trace: Option<String>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: capture_trace(),
        }
    }
}

/// Backtrace text, only when capturing is enabled via `RUST_BACKTRACE`.
fn capture_trace() -> Option<String> {
    let bt = Backtrace::capture();
    match bt.status() {
        BacktraceStatus::Captured => Some(bt.to_string()),
        _ => None,
    }
}

// ─── Unified handler error ───────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("database: {0}")]
    Database(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) | Self::NotFound(_) => ErrorKind::ValidationError,
            Self::Database(_) => ErrorKind::DatabaseError,
            Self::Internal(_) => ErrorKind::UnhandledException,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let report = ErrorReport::new(self.kind(), self.to_string());

        // Backend details stay in the tracker, not in the client body
        let message = match self {
            Self::Database(_) | Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(report);
        response
    }
}

//! API error handling.
//!
//! Structured error responses with HTTP status codes and request tracking.

use crate::errors::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with structured information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code (NOT_FOUND, SESSION_FULL, TOO_LATE, ...).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    Conflict { code: &'static str, message: String },
    PaymentRequired(String),
    InternalError(String),
}

impl ApiError {
    pub fn from_engine(request_id: String, err: EngineError) -> Self {
        let kind = match err {
            EngineError::Validation(msg) => ApiErrorKind::BadRequest(msg),
            EngineError::NotFound(key) => ApiErrorKind::NotFound(format!("Session {}", key)),
            EngineError::Full => ApiErrorKind::Conflict {
                code: "SESSION_FULL",
                message: err.to_string(),
            },
            EngineError::SelfJoin => ApiErrorKind::Conflict {
                code: "SELF_JOIN",
                message: err.to_string(),
            },
            EngineError::NotInSession => ApiErrorKind::Conflict {
                code: "NOT_IN_SESSION",
                message: err.to_string(),
            },
            EngineError::Immutable => ApiErrorKind::Conflict {
                code: "PICK_LOCKED",
                message: err.to_string(),
            },
            EngineError::TooLate => ApiErrorKind::Conflict {
                code: "TOO_LATE",
                message: err.to_string(),
            },
            EngineError::InsufficientFunds => ApiErrorKind::PaymentRequired(err.to_string()),
            other => ApiErrorKind::InternalError(other.to_string()),
        };
        Self { kind, request_id }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::NotFound(msg) => write!(f, "[{}] Not Found: {}", self.request_id, msg),
            ApiErrorKind::BadRequest(msg) => {
                write!(f, "[{}] Bad Request: {}", self.request_id, msg)
            }
            ApiErrorKind::Conflict { message, .. } => {
                write!(f, "[{}] Conflict: {}", self.request_id, message)
            }
            ApiErrorKind::PaymentRequired(msg) => {
                write!(f, "[{}] Payment Required: {}", self.request_id, msg)
            }
            ApiErrorKind::InternalError(msg) => {
                write!(f, "[{}] Internal Error: {}", self.request_id, msg)
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self.kind {
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND".to_string(), msg),
            ApiErrorKind::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST".to_string(), msg)
            }
            ApiErrorKind::Conflict { code, message } => {
                (StatusCode::CONFLICT, code.to_string(), message)
            }
            ApiErrorKind::PaymentRequired(msg) => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_FUNDS".to_string(),
                msg,
            ),
            ApiErrorKind::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR".to_string(),
                msg,
            ),
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code,
                message,
            },
        });

        (status, body).into_response()
    }
}

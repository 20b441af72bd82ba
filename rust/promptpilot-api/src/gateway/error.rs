//! Structured error envelope for the HTTP surface.
//!
//! Every failing endpoint answers with the same JSON shape:
//! `{"success": false, "error": "<code>", "message": "...", "detail": "..."}`
//! where `detail` carries the underlying error chain and is omitted in
//! production deployments.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::config::AppConfig;

/// API error with a stable machine-readable code and a human message.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub error: &'static str,
    pub message: String,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "bad_request",
            message: message.into(),
            detail: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: "unauthorized",
            message: message.into(),
            detail: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: "not_found",
            message: message.into(),
            detail: None,
        }
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            error: "quota_exceeded",
            message: message.into(),
            detail: None,
        }
    }

    /// Internal failure. The error chain goes into `detail` outside
    /// production; the message stays generic either way.
    pub fn internal(config: &AppConfig, message: impl Into<String>, source: &anyhow::Error) -> Self {
        let detail = if config.is_production() {
            None
        } else {
            Some(format!("{source:#}"))
        };
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "internal_error",
            message: message.into(),
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorBody {
            success: false,
            error: self.error,
            message: self.message,
            detail: self.detail,
        });
        (status, body).into_response()
    }
}

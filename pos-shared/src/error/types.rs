//! Application error type carrying a numeric code, a kind, and two messages

use super::codes::ErrorCode;
use super::kind::ErrorKind;
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Application error: a numeric code (§7), the kind it maps to, an opaque
/// system message (for logs) and a localisable user-facing message.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {system_message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub system_message: String,
    pub user_message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, system_message: impl Into<String>) -> Self {
        let system_message = system_message.into();
        Self {
            code,
            user_message: system_message.clone(),
            system_message,
        }
    }

    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = user_message.into();
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn http_status(&self) -> StatusCode {
        self.kind().http_status()
    }

    // ---- convenience constructors used throughout the workspace ----

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, msg)
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamUnavailable, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    pub fn concurrent_modification(cart_id: &str) -> Self {
        Self::new(
            ErrorCode::ConcurrentModification,
            format!("cart {cart_id} was modified concurrently"),
        )
        .with_user_message("Please retry your last action")
    }
}

/// Wire-level envelope for the illustrative HTTP surface (§6.1)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub code: u32,
    pub message: String,
    pub data: Option<T>,
    pub metadata: serde_json::Value,
    pub operation: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(operation: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            code: 0,
            message: "success".to_string(),
            data: Some(data),
            metadata: serde_json::json!({}),
            operation: operation.into(),
        }
    }

    pub fn error(operation: impl Into<String>, err: &AppError) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            code: err.code.code(),
            message: err.user_message.clone(),
            data: None,
            metadata: serde_json::json!({}),
            operation: operation.into(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use charter_core::{CoreError, ErrorKind};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    Unauthorized(String),
    /// Circuit open or gateway unreachable.
    Unavailable(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String, bool) {
        match self {
            AppError::Core(err) => {
                let status = match err.kind() {
                    ErrorKind::Validation => StatusCode::BAD_REQUEST,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::Expired => StatusCode::GONE,
                    ErrorKind::Upstream => StatusCode::SERVICE_UNAVAILABLE,
                    ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    "Internal Server Error".to_string()
                } else {
                    err.to_string()
                };
                (status, err.code(), message, err.is_retryable())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE", msg.clone(), false),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UPSTREAM_UNAVAILABLE", msg.clone(), true),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, retryable) = self.parts();
        match &self {
            AppError::Core(err) if status.is_server_error() => {
                tracing::error!(code, "Request failed: {}", err);
            }
            AppError::Unavailable(msg) => tracing::warn!("Service unavailable: {}", msg),
            _ => {}
        }

        let body = Json(json!({
            "error": message,
            "code": code,
            "retryable": retryable,
        }));
        (status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

//! The single error boundary: the transport-agnostic taxonomy becomes
//! HTTP statuses here and nowhere else.
//!
//! Internal errors are logged with their full chain but surfaced with a
//! safe message: no secrets, paths, or SQL in responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pfd_schemas::DiagnosticsError;
use serde_json::json;
use tracing::error;

pub struct ApiError(anyhow::Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0.downcast_ref::<DiagnosticsError>() {
            Some(DiagnosticsError::Payload(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
            Some(DiagnosticsError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone()),
            Some(DiagnosticsError::Access(msg)) => (StatusCode::FORBIDDEN, msg.clone()),
            None => {
                error!(error = ?self.0, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

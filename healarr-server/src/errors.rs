//! `HealarrError` → HTTP response (spec §7). Unlike `ferrex-server::errors::AppError`'s
//! nested `{"error":{"message":...,"status":...}}` body, the wire shape spec.md
//! §6/§8 requires is flat: `{"error": "<string>"}`, with a dedicated
//! `{"error":"Too many requests","retry_after":N}` shape for 429s.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use healarr_core::HealarrError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    Core(HealarrError),
    RateLimited { retry_after_secs: u64 },
}

impl AppError {
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }
}

impl From<HealarrError> for AppError {
    fn from(err: HealarrError) -> Self {
        Self::Core(err)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Core(e) => write!(f, "{e}"),
            AppError::RateLimited { .. } => write!(f, "rate limited"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Core(err) => {
                let status = status_for(&err);
                let body = Json(json!({ "error": err.to_string() }));
                (status, body).into_response()
            }
            AppError::RateLimited { retry_after_secs } => {
                let body = Json(json!({
                    "error": "Too many requests",
                    "retry_after": retry_after_secs,
                }));
                (StatusCode::TOO_MANY_REQUESTS, body).into_response()
            }
        }
    }
}

/// Maps each `HealarrError` variant to exactly one HTTP status (spec §7).
fn status_for(err: &HealarrError) -> StatusCode {
    match err {
        HealarrError::NotFound(_) => StatusCode::NOT_FOUND,
        HealarrError::Conflict(_) => StatusCode::CONFLICT,
        HealarrError::InvalidRequest(_) | HealarrError::InvalidPath(_) => StatusCode::BAD_REQUEST,
        HealarrError::Unauthorized => StatusCode::UNAUTHORIZED,
        HealarrError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        HealarrError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        HealarrError::Io(_) | HealarrError::Database(_) | HealarrError::Serialization(_) | HealarrError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        HealarrError::PartialSuccess { .. } => StatusCode::OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn not_found_maps_to_flat_error_body() {
        let err = AppError::from(HealarrError::NotFound("scan 9".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Not found: scan 9");
    }

    #[tokio::test]
    async fn rate_limited_includes_retry_after() {
        let err = AppError::rate_limited(7);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Too many requests");
        assert_eq!(json["retry_after"], 7);
    }
}

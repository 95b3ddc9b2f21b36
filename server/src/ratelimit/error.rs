//! Admission error types for HTTP responses.

use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Rejections produced by the admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// Request refused; retry after the given number of seconds.
    RateLimited { retry_after: u64 },
}

/// JSON response body for admission rejections.
#[derive(Serialize)]
pub struct AdmissionErrorResponse {
    /// Error code identifier.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
    /// Seconds to wait before retrying.
    pub retry_after: u64,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            Self::RateLimited { retry_after } => {
                let body = AdmissionErrorResponse {
                    error: "rate_limited",
                    message: format!("Too many requests. Wait {retry_after} seconds."),
                    retry_after,
                };
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                if let Ok(v) = HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, v);
                }
                response
            }
        }
    }
}

//! HTTP response helper functions for consistent API responses.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

/// Standard API success response with JSON data.
pub fn api_success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(data))
}

/// Plain-text 200 response, the way Icecast admin commands answer.
pub fn api_text(message: &'static str) -> impl IntoResponse {
    (StatusCode::OK, message)
}

/// Standard API error response with code and message.
pub fn api_error(
    status: StatusCode,
    code: &str,
    message: impl std::fmt::Display,
) -> impl IntoResponse {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.to_string()
        })),
    )
}

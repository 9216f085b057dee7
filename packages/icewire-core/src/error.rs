//! Centralized error types for the icewire core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to HTTP status codes for both the raw ICY front end and axum
//! - Implements `IntoResponse` for JSON error responses on the control plane

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type for the icewire server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// No mount is registered under the requested path.
    #[error("Mount not found: {0}")]
    MountNotFound(String),

    /// The mount exists but nothing is currently feeding it.
    #[error("No source on mount: {0}")]
    NoSource(String),

    /// The mount already serves its maximum number of listeners.
    #[error("Listener limit reached on {0}")]
    ListenerLimit(String),

    /// A source upload arrived without a `Content-Type` header.
    #[error("No Content-Type given")]
    MissingContentType,

    /// Credentials were missing or wrong.
    #[error("Authentication Required")]
    Unauthorized { realm: &'static str },

    /// A live source is already streaming to this mount.
    #[error("Mountpoint in use")]
    MountInUse,

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Socket-level failure while talking to a client.
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing or invalid settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StreamError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MountNotFound(_) => "mount_not_found",
            Self::NoSource(_) => "no_source",
            Self::ListenerLimit(_) => "listener_limit",
            Self::MissingContentType => "missing_content_type",
            Self::Unauthorized { .. } => "unauthorized",
            Self::MountInUse => "mount_in_use",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MountNotFound(_) | Self::NoSource(_) => StatusCode::NOT_FOUND,
            Self::ListenerLimit(_) | Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::MissingContentType | Self::MountInUse => StatusCode::FORBIDDEN,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the `WWW-Authenticate` challenge for auth failures.
    pub fn challenge(&self) -> Option<String> {
        match self {
            Self::Unauthorized { realm } => Some(format!("Basic realm=\"{realm}\"")),
            _ => None,
        }
    }

    /// Renders the error as a plain-text HTTP/1.0 response for raw sockets.
    ///
    /// Source clients and ICY players talk to the server below the axum layer,
    /// so their rejections are written straight onto the connection.
    pub fn to_raw_response(&self) -> Vec<u8> {
        let status = self.status_code();
        let body = self.to_string();
        let mut head = format!(
            "HTTP/1.0 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            body.len()
        );
        if let Some(challenge) = self.challenge() {
            head.push_str(&format!("WWW-Authenticate: {challenge}\r\n"));
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(body.as_bytes());
        out
    }
}

/// Convenient Result alias for application-wide operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let challenge = self.challenge();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

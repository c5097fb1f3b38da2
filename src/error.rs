//! Domain error taxonomy (spec §7) and its mapping onto HTTP status codes.
//!
//! Kept free of `anyhow` — call sites inside `application`/`domain` return
//! [`SandboxError`] directly; `anyhow::Context` is reserved for
//! bootstrap/infra code that never crosses the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The error taxonomy a caller of this crate's core can observe.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Malformed archive, missing base image, rejected `user` override,
    /// invalid path, or any other caller-supplied input that fails validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// API key missing or incorrect.
    #[error("unauthorized")]
    Unauthorized,

    /// No such session, or its container is unrecoverably stopped.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The patch builder's diff step failed for a reason other than the
    /// benign "nothing to commit".
    #[error("patch extraction failed: {0}")]
    PatchFailed(String),

    /// The container engine did not respond to a ping.
    #[error("container engine unavailable")]
    EngineUnavailable,

    /// An unexpected failure from the container engine.
    #[error("container engine error: {0}")]
    EngineError(String),
}

impl SandboxError {
    fn status_code(&self) -> StatusCode {
        match self {
            SandboxError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SandboxError::Unauthorized => StatusCode::FORBIDDEN,
            SandboxError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            SandboxError::PatchFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SandboxError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            SandboxError::EngineError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for SandboxError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::warn!(error = %self, status = %status, "request failed");
        (status, axum::Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        match &err {
            bollard::errors::Error::DockerResponseServerError { status_code, message }
                if *status_code == 404 =>
            {
                SandboxError::EngineError(format!("not found: {message}"))
            }
            _ => SandboxError::EngineError(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

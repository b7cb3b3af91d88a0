//! Error types for the stub daemon.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors the stub answers with an LXD error envelope.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StubError {
    /// The addressed object does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The object already exists.
    #[error("{0}")]
    Conflict(String),

    /// The request body is malformed or names an unknown action.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl StubError {
    fn status(&self) -> StatusCode {
        match self {
            StubError::NotFound(_) => StatusCode::NOT_FOUND,
            StubError::Conflict(_) => StatusCode::CONFLICT,
            StubError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for StubError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "type": "error",
            "error": self.to_string(),
            "error_code": status.as_u16(),
            "metadata": null,
        });
        (status, Json(body)).into_response()
    }
}

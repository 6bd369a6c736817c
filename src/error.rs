use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::document::DocumentError;
use crate::font::FontError;
use crate::payload::PayloadError;

/// Failures while producing a report. Anything here aborts the whole document;
/// recoverable problems (missing text, missing chart) never surface as errors.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("asset {name} not found (searched: {})", .searched.join(", "))]
    AssetNotFound { name: String, searched: Vec<String> },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Font(#[from] FontError),
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Query(#[from] QueryRejection),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Query(rejection) => (StatusCode::BAD_REQUEST, rejection.body_text()),
            AppError::Payload(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::Render(RenderError::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            AppError::Render(RenderError::AssetNotFound { name, .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("required asset {name} is not available"),
            ),
            AppError::Render(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to render report".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!("❌ Report request failed: {:?}", self);
        }
        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy surfaced by the write path and the aggregator.
///
/// `Validation` is raised before any state mutation; `Storage` wraps a failed
/// append or query against the event log, with no partial mutation behind it.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "validation",
                    "field": field,
                    "message": message,
                })),
            )
                .into_response(),
            ApiError::Storage(e) => {
                tracing::error!("storage failure: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "storage",
                        "message": format!("{e:#}"),
                    })),
                )
                    .into_response()
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

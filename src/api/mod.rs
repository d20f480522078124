// API module - HTTP endpoints

pub mod rest;

use axum::Json;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::DiagError;

/// The only body returned on a failure path
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
}

pub type ErrorResponse = (StatusCode, Json<ErrorEnvelope>);

/// Map an error onto its status code and envelope
pub fn error_response(err: DiagError) -> ErrorResponse {
    let status = err.status_code();
    if status.is_server_error() {
        tracing::warn!(kind = err.kind(), "request failed: {}", err);
    } else {
        tracing::debug!(kind = err.kind(), "request rejected: {}", err);
    }

    (
        status,
        Json(ErrorEnvelope {
            error: err.to_string(),
        }),
    )
}

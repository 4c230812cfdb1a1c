//! Mapping from domain errors to HTTP responses.
//!
//! Status codes carry the taxonomy: 404 for missing entities, 400 for
//! malformed or economically refused requests, 403 for role rank, 500
//! for infrastructure. Reject reasons pass through verbatim so clients
//! see the same vocabulary the event log records.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::warn;

use terrarium_common::TerrariumError;

pub struct ApiError(pub TerrariumError);

impl From<TerrariumError> for ApiError {
    fn from(e: TerrariumError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(TerrariumError::Anyhow(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            TerrariumError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            TerrariumError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            TerrariumError::Rejected(reason) => {
                (StatusCode::BAD_REQUEST, reason.as_str().to_string())
            }
            TerrariumError::InsufficientRole => {
                (StatusCode::FORBIDDEN, "insufficient_role".to_string())
            }
            TerrariumError::Database(e) => {
                warn!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string())
            }
            TerrariumError::Config(e) => {
                warn!(error = %e, "Config error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string())
            }
            TerrariumError::ReplayDivergence(e) => {
                warn!(error = %e, "Replay divergence");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string())
            }
            TerrariumError::Anyhow(e) => {
                warn!(error = %e, "Unhandled error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

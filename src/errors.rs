use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

/// Engine error taxonomy.
///
/// - `Validation`: bad input (unknown provider, non-finite thresholds,
///   inverted windows) — surfaced before any network activity, a run never
///   starts.
/// - `Provider`: transport/timeout/malformed payload from one model —
///   recovered per provider per target; only fatal when nothing else
///   produced data.
/// - `TotalFailure`: zero usable data for an entire window or sweep.
/// - `Persistence`: storage failure; the affected run is marked failed and
///   its computed results discarded.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Total failure: {0}")]
    TotalFailure(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Provider(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::TotalFailure(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Persistence(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal database error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

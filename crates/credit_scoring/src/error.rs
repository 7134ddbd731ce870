//! Failure taxonomy of a batch prediction and its HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// A batch-level failure. No partial success is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("model '{0}' not found or inactive")]
    ModelUnavailable(String),

    #[error("failed to load model '{name}': {source:#}")]
    ModelLoad {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("model registry lookup failed: {0}")]
    Registry(#[source] sqlx::Error),

    #[error("feature preparation failed: {0}")]
    FeaturePreparation(String),

    #[error("failed to persist inputs: {0}")]
    Persistence(#[source] sqlx::Error),

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ScoringError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ModelUnavailable(_) => StatusCode::NOT_FOUND,
            Self::ModelLoad { .. } | Self::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::FeaturePreparation(_) | Self::Persistence(_) | Self::Prediction(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ScoringError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

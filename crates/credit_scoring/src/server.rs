//! HTTP surface: batch prediction, model listing and health.

use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use database::{ModelRegistry, ProfilingStore};
use scoring_structs::{NewProfilingLog, PredictRequest, RegisteredModel};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ScoringError;
use crate::pipeline::{PredictOutcome, ScoringPipeline};


/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<ScoringPipeline>,
    registry: Arc<dyn ModelRegistry>,
    profiler: Option<Arc<dyn ProfilingStore>>,
}

impl AppState {
    #[must_use]
    pub fn new(pipeline: Arc<ScoringPipeline>, registry: Arc<dyn ModelRegistry>) -> Self {
        Self {
            pipeline,
            registry,
            profiler: None,
        }
    }

    /// Persists one profile per predict request to `profiler`.
    #[must_use]
    pub fn with_profiler(mut self, profiler: Arc<dyn ProfilingStore>) -> Self {
        self.profiler = Some(profiler);
        self
    }
}

#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/predict/", post(predict))
        .route("/models", get(list_models))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    models: Vec<RegisteredModel>,
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ScoringError> {
    let models = state
        .registry
        .list_models()
        .await
        .map_err(ScoringError::Registry)?;

    Ok(Json(ModelsResponse { models }))
}

async fn predict(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Response, ScoringError> {
    let started = Instant::now();
    let model_name = payload.as_ref().ok().map(|json| json.model_name.clone());

    let scored = score(&state.pipeline, payload).await;

    if let Some(profiler) = &state.profiler {
        let total_ms = millis(started.elapsed());
        let profile = profile_of(uri.path(), model_name, scored.as_ref().ok(), total_ms);
        match profiler.record_profile(&profile).await {
            Ok(id) => debug!(profile_id = %id, total_ms, "Profile recorded"),
            Err(e) => warn!(error = %e, "Failed to record profile"),
        }
    }

    let scored = scored?;
    Ok((StatusCode::OK, [(CONTENT_TYPE, "application/json")], scored.body).into_response())
}

/// A scored batch with its serialized response body.
struct Scored {
    outcome: PredictOutcome,
    body: Vec<u8>,
    serialization_ms: f64,
}

async fn score(
    pipeline: &ScoringPipeline,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Scored, ScoringError> {
    let Json(request) = payload.map_err(|e| ScoringError::InvalidRequest(e.body_text()))?;
    let outcome = pipeline.predict(request).await?;

    let serialize_started = Instant::now();
    let body = serde_json::to_vec(&outcome.response)
        .map_err(|e| ScoringError::Prediction(format!("failed to serialize response: {e}")))?;

    Ok(Scored {
        outcome,
        body,
        serialization_ms: millis(serialize_started.elapsed()),
    })
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Profile of one predict call. Failed calls carry no predictions and no
/// stage timings.
fn profile_of(
    endpoint: &str,
    model_name: Option<String>,
    scored: Option<&Scored>,
    total_ms: f64,
) -> NewProfilingLog {
    let num_predictions = scored.map_or(0, |s| {
        i32::try_from(s.outcome.response.results.len()).unwrap_or(i32::MAX)
    });

    NewProfilingLog {
        endpoint: endpoint.to_owned(),
        method: Method::POST.to_string(),
        model_name,
        total_time_ms: total_ms,
        num_predictions,
        time_preprocessing_ms: scored.map(|s| s.outcome.timings.preprocessing_ms),
        time_inference_ms: scored.map(|s| s.outcome.timings.inference_ms),
        time_database_ms: scored.map(|s| s.outcome.timings.database_ms),
        time_serialization_ms: scored.map(|s| s.serialization_ms),
    }
}

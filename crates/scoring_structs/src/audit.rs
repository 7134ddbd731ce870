use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Input snapshot to be written to `ml_inputs`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInputRecord {
    pub created_at: DateTime<Utc>,
    pub model_name: String,
    pub raw_data: Value,
    pub features: Value,
}

/// Committed input snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub model_name: String,
    pub raw_data: Value,
    pub features: Option<Value>,
}

impl InputRecord {
    #[must_use]
    pub fn from_new(id: Uuid, input: NewInputRecord) -> Self {
        Self {
            id,
            created_at: input.created_at,
            model_name: input.model_name,
            raw_data: input.raw_data,
            features: Some(input.features),
        }
    }
}

/// Output snapshot to be written to `ml_outputs`, linked to one input.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutputRecord {
    pub input_id: Uuid,
    pub request_id: String,
    pub model_name: String,
    pub model_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub latency_ms: i32,
    pub prediction: String,
    pub prob: f64,
    pub proba_defaut: f64,
    pub proba_solvable: f64,
    pub threshold: f64,
    pub classes: Value,
    pub meta: Value,
    pub error: Option<String>,
}

/// Committed output snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub id: Uuid,
    pub input_id: Uuid,
    pub request_id: Option<String>,
    pub model_name: Option<String>,
    pub model_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub latency_ms: Option<i32>,
    pub prediction: String,
    pub prob: Option<f64>,
    pub proba_defaut: Option<f64>,
    pub proba_solvable: Option<f64>,
    pub threshold: Option<f64>,
    pub classes: Option<Value>,
    pub meta: Option<Value>,
    pub error: Option<String>,
}

impl OutputRecord {
    #[must_use]
    pub fn from_new(id: Uuid, output: NewOutputRecord) -> Self {
        Self {
            id,
            input_id: output.input_id,
            request_id: Some(output.request_id),
            model_name: Some(output.model_name),
            model_version: output.model_version,
            created_at: output.created_at,
            latency_ms: Some(output.latency_ms),
            prediction: output.prediction,
            prob: Some(output.prob),
            proba_defaut: Some(output.proba_defaut),
            proba_solvable: Some(output.proba_solvable),
            threshold: Some(output.threshold),
            classes: Some(output.classes),
            meta: Some(output.meta),
            error: output.error,
        }
    }
}

/// Per-request timing breakdown written to `profiling_logs`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProfilingLog {
    pub endpoint: String,
    pub method: String,
    pub model_name: Option<String>,
    pub total_time_ms: f64,
    pub num_predictions: i32,
    pub time_preprocessing_ms: Option<f64>,
    pub time_inference_ms: Option<f64>,
    pub time_database_ms: Option<f64>,
    pub time_serialization_ms: Option<f64>,
}

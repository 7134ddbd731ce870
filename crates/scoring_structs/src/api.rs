use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Batch prediction request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictRequest {
    pub model_name: String,
    pub inputs: Vec<Map<String, Value>>,
}

/// Solvency label returned for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionLabel {
    Solvable,
    NonSolvable,
}

impl PredictionLabel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Solvable => "solvable",
            Self::NonSolvable => "non_solvable",
        }
    }
}

impl fmt::Display for PredictionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prediction for one record: the label and the probability of that label.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PredictItemResult {
    pub label: PredictionLabel,
    pub proba: f64,
}

/// Batch prediction response, results in input order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PredictResponse {
    pub model_name: String,
    pub results: Vec<PredictItemResult>,
}

//! Batch pipeline: registry check, model load, feature derivation,
//! classification and the atomic audit write.

use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use database::{AuditStore, AuditTransaction, ModelRegistry};
use feature_extractor::{FeatureSchema, derive_batch};
use ml_model::{ClassifierAdapter, Decision, ModelCache};
use scoring_structs::{
    ModelInput, NewInputRecord, NewOutputRecord, PredictItemResult, PredictRequest,
    PredictResponse, RawRecord, RegisteredModel,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ScoringError;

/// Wall time spent in each stage of one batch, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub preprocessing_ms: f64,
    pub inference_ms: f64,
    pub database_ms: f64,
    pub total_ms: f64,
}

/// Result of a successful batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictOutcome {
    pub response: PredictResponse,
    /// Identifier shared by every output row of the batch.
    pub request_id: String,
    pub timings: StageTimings,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Scores batches of raw applicant records against a registered model.
pub struct ScoringPipeline {
    registry: Arc<dyn ModelRegistry>,
    store: Arc<dyn AuditStore>,
    models: Arc<ModelCache>,
    schema: FeatureSchema,
    threshold: f64,
}

impl ScoringPipeline {
    #[must_use]
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        store: Arc<dyn AuditStore>,
        models: Arc<ModelCache>,
        schema: FeatureSchema,
        threshold: f64,
    ) -> Self {
        Self {
            registry,
            store,
            models,
            schema,
            threshold,
        }
    }

    #[must_use]
    pub const fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Validates a request body into typed raw records.
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError::InvalidRequest`] if the batch is empty, the
    /// model name is blank, or any record fails validation.
    pub fn prepare(&self, request: &PredictRequest) -> Result<Vec<RawRecord>, ScoringError> {
        if request.model_name.trim().is_empty() {
            return Err(ScoringError::InvalidRequest(
                "model_name must not be empty".to_owned(),
            ));
        }
        if request.inputs.is_empty() {
            return Err(ScoringError::InvalidRequest(
                "inputs must contain at least one record".to_owned(),
            ));
        }

        request
            .inputs
            .iter()
            .enumerate()
            .map(|(index, object)| {
                self.schema
                    .parse_record(object)
                    .map_err(|e| ScoringError::InvalidRequest(format!("inputs[{index}]: {e}")))
            })
            .collect()
    }

    /// Validates and processes a request body.
    ///
    /// # Errors
    ///
    /// See [`ScoringPipeline::prepare`] and [`ScoringPipeline::process`].
    pub async fn predict(&self, request: PredictRequest) -> Result<PredictOutcome, ScoringError> {
        let records = self.prepare(&request)?;
        self.process(&request.model_name, records).await
    }

    /// Scores a batch and writes its audit trail in one transaction.
    ///
    /// On success exactly one input row and one output row are committed per
    /// record, and results come back in input order. On any failure after
    /// derivation nothing from the batch is committed.
    ///
    /// # Errors
    ///
    /// Returns the [`ScoringError`] of the first failing stage.
    pub async fn process(
        &self,
        model_name: &str,
        records: Vec<RawRecord>,
    ) -> Result<PredictOutcome, ScoringError> {
        let started = Instant::now();
        let mut timings = StageTimings::default();

        let model = self.resolve_model(model_name).await?;
        let classifier = self
            .models
            .get(model_name)
            .await
            .map_err(|source| ScoringError::ModelLoad {
                name: model_name.to_owned(),
                source,
            })?;
        let adapter = ClassifierAdapter::new(classifier, self.threshold);

        let stage = Instant::now();
        let inputs = self.model_inputs(&records)?;
        timings.preprocessing_ms = millis(stage.elapsed());

        let created_at = Utc::now();
        let new_inputs: Vec<NewInputRecord> = records
            .iter()
            .zip(&inputs)
            .map(|(record, input)| NewInputRecord {
                created_at,
                model_name: model_name.to_owned(),
                raw_data: Value::Object(record.to_json()),
                features: Value::Object(input.to_json()),
            })
            .collect();

        let stage = Instant::now();
        let mut tx = self.store.begin().await.map_err(ScoringError::Persistence)?;
        let input_ids = match tx.insert_inputs(&new_inputs).await {
            Ok(ids) if ids.len() == records.len() => ids,
            Ok(ids) => {
                let error = ScoringError::Persistence(sqlx::Error::Protocol(format!(
                    "stored {} inputs for {} records",
                    ids.len(),
                    records.len()
                )));
                return Err(abort(tx, error).await);
            }
            Err(e) => return Err(abort(tx, ScoringError::Persistence(e)).await),
        };
        timings.database_ms += millis(stage.elapsed());

        let stage = Instant::now();
        let decisions = match classify(adapter.clone(), inputs).await {
            Ok(decisions) => decisions,
            Err(error) => return Err(abort(tx, error).await),
        };
        timings.inference_ms = millis(stage.elapsed());

        let elapsed = started.elapsed();
        let elapsed_ms = i32::try_from(elapsed.as_millis()).unwrap_or(i32::MAX);
        let request_id = Uuid::new_v4().to_string();
        let meta = json!({ "request_id": request_id, "elapsed_ms": elapsed_ms });
        let classes = json!(adapter.classes());

        let outputs: Vec<NewOutputRecord> = input_ids
            .iter()
            .zip(&decisions)
            .map(|(input_id, decision)| NewOutputRecord {
                input_id: *input_id,
                request_id: request_id.clone(),
                model_name: model_name.to_owned(),
                model_version: model.version.clone(),
                created_at,
                latency_ms: elapsed_ms,
                prediction: decision.label.as_str().to_owned(),
                prob: decision.proba,
                proba_defaut: decision.proba_default,
                proba_solvable: decision.proba_solvable,
                threshold: adapter.threshold(),
                classes: classes.clone(),
                meta: meta.clone(),
                error: None,
            })
            .collect();

        let stage = Instant::now();
        if let Err(e) = tx.insert_outputs(&outputs).await {
            return Err(abort(tx, ScoringError::Prediction(e.to_string())).await);
        }
        tx.commit()
            .await
            .map_err(|e| ScoringError::Prediction(e.to_string()))?;
        timings.database_ms += millis(stage.elapsed());
        timings.total_ms = millis(started.elapsed());

        info!(
            model = model_name,
            records = records.len(),
            request_id = %request_id,
            elapsed_ms,
            "Batch scored"
        );

        let results = decisions
            .iter()
            .map(|decision| PredictItemResult {
                label: decision.label,
                proba: decision.proba,
            })
            .collect();

        Ok(PredictOutcome {
            response: PredictResponse {
                model_name: model_name.to_owned(),
                results,
            },
            request_id,
            timings,
        })
    }

    async fn resolve_model(&self, model_name: &str) -> Result<RegisteredModel, ScoringError> {
        match self.registry.find_model(model_name).await {
            Ok(Some(model)) if model.is_active => Ok(model),
            Ok(_) => Err(ScoringError::ModelUnavailable(model_name.to_owned())),
            Err(e) => Err(ScoringError::Registry(e)),
        }
    }

    /// Derived feature vectors, or the raw records when derivation fails.
    fn model_inputs(&self, records: &[RawRecord]) -> Result<Vec<ModelInput>, ScoringError> {
        match derive_batch(records, &self.schema) {
            Ok(vectors) if vectors.len() == records.len() => {
                debug!(records = records.len(), schema = %self.schema.version, "Features derived");
                Ok(vectors.into_iter().map(ModelInput::Features).collect())
            }
            Ok(vectors) => Err(ScoringError::FeaturePreparation(format!(
                "derived {} feature vectors for {} records",
                vectors.len(),
                records.len()
            ))),
            Err(e) => {
                warn!(error = %e, "Feature derivation failed, scoring raw records");
                Ok(records.iter().cloned().map(ModelInput::Raw).collect())
            }
        }
    }
}

async fn classify(
    adapter: ClassifierAdapter,
    inputs: Vec<ModelInput>,
) -> Result<Vec<Decision>, ScoringError> {
    tokio::task::spawn_blocking(move || adapter.classify(&inputs))
        .await
        .map_err(|e| ScoringError::Prediction(format!("classification task failed: {e}")))?
        .map_err(|e| ScoringError::Prediction(e.to_string()))
}

/// Rolls the transaction back and returns `error` unchanged.
async fn abort(tx: Box<dyn AuditTransaction>, error: ScoringError) -> ScoringError {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
    error
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use database::{FailurePoint, MemoryStore};
    use feature_extractor::ImputationPolicy;
    use ml_model::{Classifier, DEFAULT_THRESHOLD, ModelLoader};
    use scoring_structs::PredictionLabel;
    use serde_json::Map;

    use super::*;

    /// Returns the same probability row for every input and remembers
    /// whether each input had derived features.
    pub(crate) struct FixedClassifier {
        classes: Option<Vec<i64>>,
        row: Vec<f64>,
        seen_derived: Mutex<Vec<bool>>,
    }

    impl FixedClassifier {
        pub(crate) fn new(classes: Option<Vec<i64>>, row: Vec<f64>) -> Self {
            Self {
                classes,
                row,
                seen_derived: Mutex::new(Vec::new()),
            }
        }
    }

    impl Classifier for FixedClassifier {
        fn classes(&self) -> Option<&[i64]> {
            self.classes.as_deref()
        }

        fn predict_proba(&self, rows: &[ModelInput]) -> anyhow::Result<Vec<Vec<f64>>> {
            self.seen_derived
                .lock()
                .expect("lock should not be poisoned")
                .extend(rows.iter().map(ModelInput::is_derived));
            Ok(vec![self.row.clone(); rows.len()])
        }
    }

    pub(crate) struct FakeLoader {
        models: HashMap<String, Arc<dyn Classifier>>,
    }

    impl ModelLoader for FakeLoader {
        fn load(&self, name: &str) -> anyhow::Result<Arc<dyn Classifier>> {
            self.models
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no checkpoint for '{name}'"))
        }
    }

    pub(crate) fn cache_with(name: &str, classifier: Arc<dyn Classifier>) -> Arc<ModelCache> {
        let models = HashMap::from([(name.to_owned(), classifier)]);
        Arc::new(ModelCache::new(Arc::new(FakeLoader { models })))
    }

    pub(crate) fn pipeline(store: &MemoryStore, models: Arc<ModelCache>) -> ScoringPipeline {
        ScoringPipeline::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            models,
            FeatureSchema::credit_v1(),
            DEFAULT_THRESHOLD,
        )
    }

    pub(crate) fn applicant(id: i64) -> Map<String, Value> {
        json!({
            "SK_ID_CURR": id,
            "AMT_INCOME_TOTAL": 202_500.0,
            "AMT_CREDIT": 406_597.5,
            "AMT_ANNUITY": 24_700.5,
            "CNT_CHILDREN": 0,
            "CNT_FAM_MEMBERS": 1,
            "DAYS_BIRTH": -9461,
            "DAYS_EMPLOYED": 365_243,
            "NAME_CONTRACT_TYPE": "Cash loans",
            "CODE_GENDER": "M",
        })
        .as_object()
        .cloned()
        .expect("applicant should be an object")
    }

    fn request(model_name: &str, n: i64) -> PredictRequest {
        PredictRequest {
            model_name: model_name.to_owned(),
            inputs: (0..n).map(|i| applicant(100_000 + i)).collect(),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_solvable() {
        let store = MemoryStore::new().with_model("best_model", Some("1.0.0"));
        // Default class first: p(default) = 0.3.
        let classifier = Arc::new(FixedClassifier::new(Some(vec![1, 0]), vec![0.3, 0.7]));
        let pipeline = pipeline(&store, cache_with("best_model", classifier));

        let outcome = pipeline
            .predict(request("best_model", 1))
            .await
            .expect("prediction should succeed");

        assert_eq!(outcome.response.model_name, "best_model");
        assert_eq!(outcome.response.results.len(), 1);
        let result = outcome.response.results[0];
        assert_eq!(result.label, PredictionLabel::Solvable);
        assert!((result.proba - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_default_column_resolved_by_label() {
        let store = MemoryStore::new().with_model("best_model", None);
        let classifier = Arc::new(FixedClassifier::new(Some(vec![0, 1]), vec![0.3, 0.7]));
        let pipeline = pipeline(&store, cache_with("best_model", classifier));

        let outcome = pipeline
            .predict(request("best_model", 1))
            .await
            .expect("prediction should succeed");

        let result = outcome.response.results[0];
        assert_eq!(result.label, PredictionLabel::NonSolvable);
        assert!((result.proba - 0.7).abs() < f64::EPSILON);

        let output = &store.outputs()[0];
        assert_eq!(output.proba_defaut, Some(0.7));
        assert_eq!(output.proba_solvable, Some(0.3));
        assert_eq!(output.threshold, Some(DEFAULT_THRESHOLD));
    }

    #[tokio::test]
    async fn test_batch_writes_linked_audit_trail() {
        let store = MemoryStore::new().with_model("best_model", Some("1.0.0"));
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.4, 0.6]));
        let pipeline = pipeline(&store, cache_with("best_model", classifier));

        let outcome = pipeline
            .predict(request("best_model", 3))
            .await
            .expect("prediction should succeed");

        assert_eq!(outcome.response.results.len(), 3);
        for result in &outcome.response.results {
            assert!((0.0..=1.0).contains(&result.proba));
        }

        let inputs = store.inputs();
        let outputs = store.outputs();
        assert_eq!(inputs.len(), 3);
        assert_eq!(outputs.len(), 3);

        for (input, output) in inputs.iter().zip(&outputs) {
            assert_eq!(output.input_id, input.id);
            assert_eq!(output.request_id.as_deref(), Some(outcome.request_id.as_str()));
            assert_eq!(output.model_version.as_deref(), Some("1.0.0"));
            assert_eq!(output.prediction, "non_solvable");
            assert_eq!(output.classes, Some(json!([0, 1])));
            let meta = output.meta.as_ref().expect("meta should be set");
            assert_eq!(meta["request_id"], json!(outcome.request_id));
            assert!(meta["elapsed_ms"].is_i64());
        }

        let features = inputs[0].features.as_ref().expect("features should be stored");
        assert!(features.get("DAYS_EMPLOYED").is_some_and(Value::is_number));
        assert_eq!(inputs[0].raw_data["SK_ID_CURR"], json!(100_000));
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        struct ById;

        impl Classifier for ById {
            fn predict_proba(&self, rows: &[ModelInput]) -> anyhow::Result<Vec<Vec<f64>>> {
                Ok(rows
                    .iter()
                    .map(|row| {
                        let id = row
                            .get("SK_ID_CURR")
                            .and_then(scoring_structs::Cell::as_number)
                            .unwrap_or_default();
                        let p_default = if id % 2.0 == 0.0 { 0.9 } else { 0.1 };
                        vec![1.0 - p_default, p_default]
                    })
                    .collect())
            }
        }

        let store = MemoryStore::new().with_model("best_model", None);
        let pipeline = pipeline(&store, cache_with("best_model", Arc::new(ById)));

        let outcome = pipeline
            .predict(request("best_model", 4))
            .await
            .expect("prediction should succeed");

        let labels: Vec<PredictionLabel> =
            outcome.response.results.iter().map(|r| r.label).collect();
        assert_eq!(
            labels,
            [
                PredictionLabel::NonSolvable,
                PredictionLabel::Solvable,
                PredictionLabel::NonSolvable,
                PredictionLabel::Solvable,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_model_persists_nothing() {
        let store = MemoryStore::new();
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.5, 0.5]));
        let pipeline = pipeline(&store, cache_with("best_model", classifier));

        let result = pipeline.predict(request("best_model", 2)).await;

        assert!(matches!(result, Err(ScoringError::ModelUnavailable(_))));
        assert!(store.inputs().is_empty());
        assert!(store.outputs().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_model_is_unavailable() {
        let store = MemoryStore::new().with_inactive_model("old_model");
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.5, 0.5]));
        let pipeline = pipeline(&store, cache_with("old_model", classifier));

        let result = pipeline.predict(request("old_model", 1)).await;

        assert!(matches!(result, Err(ScoringError::ModelUnavailable(_))));
    }

    #[tokio::test]
    async fn test_load_failure_is_server_fault() {
        let store = MemoryStore::new().with_model("best_model", None);
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.5, 0.5]));
        let pipeline = pipeline(&store, cache_with("other_model", classifier));

        let result = pipeline.predict(request("best_model", 1)).await;

        assert!(matches!(result, Err(ScoringError::ModelLoad { .. })));
        assert!(store.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_output_failure_rolls_back_inputs() {
        let store = MemoryStore::new().with_model("best_model", None);
        store.fail_at(Some(FailurePoint::InsertOutputs));
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.5, 0.5]));
        let pipeline = pipeline(&store, cache_with("best_model", classifier));

        let result = pipeline.predict(request("best_model", 3)).await;

        assert!(matches!(result, Err(ScoringError::Prediction(_))));
        assert!(store.inputs().is_empty());
        assert!(store.outputs().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_persists_nothing() {
        let store = MemoryStore::new().with_model("best_model", None);
        store.fail_at(Some(FailurePoint::Commit));
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.5, 0.5]));
        let pipeline = pipeline(&store, cache_with("best_model", classifier));

        let result = pipeline.predict(request("best_model", 2)).await;

        assert!(matches!(result, Err(ScoringError::Prediction(_))));
        assert!(store.inputs().is_empty());
        assert!(store.outputs().is_empty());
    }

    #[tokio::test]
    async fn test_input_failure_is_persistence_error() {
        let store = MemoryStore::new().with_model("best_model", None);
        store.fail_at(Some(FailurePoint::InsertInputs));
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.5, 0.5]));
        let pipeline = pipeline(&store, cache_with("best_model", classifier));

        let result = pipeline.predict(request("best_model", 1)).await;

        assert!(matches!(result, Err(ScoringError::Persistence(_))));
        assert!(store.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_classes_roll_back() {
        let store = MemoryStore::new().with_model("best_model", None);
        let classifier = Arc::new(FixedClassifier::new(Some(vec![0, 2]), vec![0.5, 0.5]));
        let pipeline = pipeline(&store, cache_with("best_model", classifier));

        let result = pipeline.predict(request("best_model", 2)).await;

        assert!(matches!(result, Err(ScoringError::Prediction(_))));
        assert!(store.inputs().is_empty());
    }

    #[tokio::test]
    async fn test_derivation_failure_falls_back_to_raw_records() {
        let store = MemoryStore::new().with_model("best_model", None);
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.8, 0.2]));
        let mut schema = FeatureSchema::credit_v1().with_imputation(ImputationPolicy::Median);
        schema.categorical_columns.push("AMT_CREDIT".to_owned());
        let pipeline = ScoringPipeline::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            cache_with("best_model", Arc::clone(&classifier) as Arc<dyn Classifier>),
            schema,
            DEFAULT_THRESHOLD,
        );

        let outcome = pipeline
            .predict(request("best_model", 2))
            .await
            .expect("prediction should fall back to raw records");

        assert_eq!(outcome.response.results.len(), 2);
        assert_eq!(
            *classifier.seen_derived.lock().expect("lock should not be poisoned"),
            [false, false]
        );
        assert_eq!(store.outputs().len(), 2);
    }

    #[tokio::test]
    async fn test_derived_features_reach_classifier() {
        let store = MemoryStore::new().with_model("best_model", None);
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.8, 0.2]));
        let pipeline = pipeline(
            &store,
            cache_with("best_model", Arc::clone(&classifier) as Arc<dyn Classifier>),
        );

        pipeline
            .predict(request("best_model", 2))
            .await
            .expect("prediction should succeed");

        assert_eq!(
            *classifier.seen_derived.lock().expect("lock should not be poisoned"),
            [true, true]
        );
    }

    #[test]
    fn test_prepare_rejects_invalid_batches() {
        let store = MemoryStore::new();
        let classifier = Arc::new(FixedClassifier::new(None, vec![0.5, 0.5]));
        let pipeline = pipeline(&store, cache_with("best_model", classifier));

        let empty = PredictRequest {
            model_name: "best_model".to_owned(),
            inputs: Vec::new(),
        };
        assert!(matches!(
            pipeline.prepare(&empty),
            Err(ScoringError::InvalidRequest(_))
        ));

        let mut negative = applicant(1);
        negative.insert("AMT_CREDIT".to_owned(), json!(-1.0));
        let bad = PredictRequest {
            model_name: "best_model".to_owned(),
            inputs: vec![applicant(0), negative],
        };
        let Err(ScoringError::InvalidRequest(message)) = pipeline.prepare(&bad) else {
            panic!("negative amount should be rejected");
        };
        assert!(message.starts_with("inputs[1]"));
    }
}

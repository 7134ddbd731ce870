//! Predict command - scores a batch read from a JSON file.

use std::path::Path;

use anyhow::{Context, Result};
use config::Config;
use scoring_structs::PredictRequest;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::info;

use super::build_pipeline;

/// Runs the predict command and prints the response JSON.
///
/// The file holds either a single record object or an array of records.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the batch fails.
pub async fn run(pool: &PgPool, config: &Config, model: &str, input: &Path) -> Result<()> {
    let data = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let parsed: Value = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {}", input.display()))?;

    let request = PredictRequest {
        model_name: model.to_owned(),
        inputs: records_of(parsed)?,
    };

    info!(
        model,
        records = request.inputs.len(),
        input = %input.display(),
        "Scoring batch"
    );

    let pipeline = build_pipeline(pool, config)?;
    let outcome = pipeline.predict(request).await?;

    info!(
        request_id = %outcome.request_id,
        total_ms = outcome.timings.total_ms,
        "Batch committed"
    );
    println!("{}", serde_json::to_string_pretty(&outcome.response)?);

    Ok(())
}

fn records_of(value: Value) -> Result<Vec<Map<String, Value>>> {
    match value {
        Value::Object(record) => Ok(vec![record]),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(record) => Ok(record),
                _ => anyhow::bail!("record {index} is not a JSON object"),
            })
            .collect(),
        _ => anyhow::bail!("expected a JSON object or an array of objects"),
    }
}

//! Repository functions for output snapshots.

use scoring_structs::NewOutputRecord;
use sqlx::PgConnection;
use uuid::Uuid;

/// Inserts all output snapshots in one statement, returning their ids in
/// input order.
///
/// # Errors
///
/// Returns an error if the database operation fails, a referenced input
/// does not exist, or a row was not written.
pub async fn insert_outputs(
    conn: &mut PgConnection,
    outputs: &[NewOutputRecord],
) -> Result<Vec<Uuid>, sqlx::Error> {
    if outputs.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = outputs.iter().map(|_| Uuid::new_v4()).collect();
    let input_ids: Vec<Uuid> = outputs.iter().map(|o| o.input_id).collect();
    let request_ids: Vec<String> = outputs.iter().map(|o| o.request_id.clone()).collect();
    let model_names: Vec<String> = outputs.iter().map(|o| o.model_name.clone()).collect();
    let model_versions: Vec<Option<String>> =
        outputs.iter().map(|o| o.model_version.clone()).collect();
    let created_at: Vec<_> = outputs.iter().map(|o| o.created_at).collect();
    let latencies: Vec<i32> = outputs.iter().map(|o| o.latency_ms).collect();
    let predictions: Vec<String> = outputs.iter().map(|o| o.prediction.clone()).collect();
    let probs: Vec<f64> = outputs.iter().map(|o| o.prob).collect();
    let proba_defaut: Vec<f64> = outputs.iter().map(|o| o.proba_defaut).collect();
    let proba_solvable: Vec<f64> = outputs.iter().map(|o| o.proba_solvable).collect();
    let thresholds: Vec<f64> = outputs.iter().map(|o| o.threshold).collect();
    let classes: Vec<serde_json::Value> = outputs.iter().map(|o| o.classes.clone()).collect();
    let meta: Vec<serde_json::Value> = outputs.iter().map(|o| o.meta.clone()).collect();
    let errors: Vec<Option<String>> = outputs.iter().map(|o| o.error.clone()).collect();

    let result = sqlx::query(
        r"
        INSERT INTO ml_outputs (
            id, input_id, request_id, model_name, model_version, created_at, latency_ms,
            prediction, prob, proba_defaut, proba_solvable, threshold, classes, meta, error
        )
        SELECT * FROM unnest(
            $1::uuid[], $2::uuid[], $3::text[], $4::text[], $5::text[], $6::timestamptz[],
            $7::int4[], $8::text[], $9::float8[], $10::float8[], $11::float8[], $12::float8[],
            $13::jsonb[], $14::jsonb[], $15::text[]
        )
        ",
    )
    .bind(&ids)
    .bind(&input_ids)
    .bind(&request_ids)
    .bind(&model_names)
    .bind(&model_versions)
    .bind(&created_at)
    .bind(&latencies)
    .bind(&predictions)
    .bind(&probs)
    .bind(&proba_defaut)
    .bind(&proba_solvable)
    .bind(&thresholds)
    .bind(&classes)
    .bind(&meta)
    .bind(&errors)
    .execute(conn)
    .await?;

    if result.rows_affected() != ids.len() as u64 {
        return Err(sqlx::Error::Protocol(format!(
            "inserted {} of {} output rows",
            result.rows_affected(),
            ids.len()
        )));
    }

    Ok(ids)
}

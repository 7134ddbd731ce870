//! Repository functions for input snapshots.

use scoring_structs::NewInputRecord;
use sqlx::PgConnection;
use uuid::Uuid;

/// Inserts all input snapshots in one statement.
///
/// Ids are generated here, so the returned ids line up with `inputs`.
///
/// # Errors
///
/// Returns an error if the database operation fails or a row was not
/// written.
pub async fn insert_inputs(
    conn: &mut PgConnection,
    inputs: &[NewInputRecord],
) -> Result<Vec<Uuid>, sqlx::Error> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = inputs.iter().map(|_| Uuid::new_v4()).collect();
    let created_at: Vec<_> = inputs.iter().map(|i| i.created_at).collect();
    let model_names: Vec<String> = inputs.iter().map(|i| i.model_name.clone()).collect();
    let raw_data: Vec<serde_json::Value> = inputs.iter().map(|i| i.raw_data.clone()).collect();
    let features: Vec<serde_json::Value> = inputs.iter().map(|i| i.features.clone()).collect();

    let result = sqlx::query(
        r"
        INSERT INTO ml_inputs (id, created_at, model_name, raw_data, features)
        SELECT * FROM unnest($1::uuid[], $2::timestamptz[], $3::text[], $4::jsonb[], $5::jsonb[])
        ",
    )
    .bind(&ids)
    .bind(&created_at)
    .bind(&model_names)
    .bind(&raw_data)
    .bind(&features)
    .execute(conn)
    .await?;

    if result.rows_affected() != ids.len() as u64 {
        return Err(sqlx::Error::Protocol(format!(
            "inserted {} of {} input rows",
            result.rows_affected(),
            ids.len()
        )));
    }

    Ok(ids)
}

//! Repository functions for request profiles.

use async_trait::async_trait;
use scoring_structs::NewProfilingLog;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ProfilingStore;

/// Inserts one profile row.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub async fn insert_profiling_log(
    pool: &PgPool,
    profile: &NewProfilingLog,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();

    sqlx::query(
        r"
        INSERT INTO profiling_logs (
            id, endpoint, method, model_name, total_time_ms, num_predictions,
            time_preprocessing_ms, time_inference_ms, time_database_ms, time_serialization_ms
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ",
    )
    .bind(id)
    .bind(&profile.endpoint)
    .bind(&profile.method)
    .bind(&profile.model_name)
    .bind(profile.total_time_ms)
    .bind(profile.num_predictions)
    .bind(profile.time_preprocessing_ms)
    .bind(profile.time_inference_ms)
    .bind(profile.time_database_ms)
    .bind(profile.time_serialization_ms)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Profiling sink backed by the `profiling_logs` table.
#[derive(Debug, Clone)]
pub struct PgProfilingStore {
    pool: PgPool,
}

impl PgProfilingStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfilingStore for PgProfilingStore {
    async fn record_profile(&self, profile: &NewProfilingLog) -> Result<Uuid, sqlx::Error> {
        insert_profiling_log(&self.pool, profile).await
    }
}

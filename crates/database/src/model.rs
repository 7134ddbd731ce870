//! Repository functions for model registry operations.

use async_trait::async_trait;
use scoring_structs::RegisteredModel;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ModelRegistry;

/// Registers a model, or updates the registration with the same name.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub async fn insert_model(
    pool: &PgPool,
    name: &str,
    description: Option<&str>,
    version: Option<&str>,
    is_active: bool,
) -> Result<RegisteredModel, sqlx::Error> {
    sqlx::query_as::<_, RegisteredModel>(
        r"
        INSERT INTO ml_models (id, name, description, version, is_active)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (name) DO UPDATE
        SET description = EXCLUDED.description,
            version = EXCLUDED.version,
            is_active = EXCLUDED.is_active
        RETURNING id, name, description, version, is_active, created_at
        ",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(description)
    .bind(version)
    .bind(is_active)
    .fetch_one(pool)
    .await
}

/// Model registry backed by the `ml_models` table.
#[derive(Debug, Clone)]
pub struct PgModelRegistry {
    pool: PgPool,
}

impl PgModelRegistry {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ModelRegistry for PgModelRegistry {
    async fn find_model(&self, name: &str) -> Result<Option<RegisteredModel>, sqlx::Error> {
        sqlx::query_as::<_, RegisteredModel>(
            r"
            SELECT id, name, description, version, is_active, created_at
            FROM ml_models
            WHERE name = $1
            ",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_models(&self) -> Result<Vec<RegisteredModel>, sqlx::Error> {
        sqlx::query_as::<_, RegisteredModel>(
            r"
            SELECT id, name, description, version, is_active, created_at
            FROM ml_models
            ORDER BY name
            ",
        )
        .fetch_all(&self.pool)
        .await
    }
}

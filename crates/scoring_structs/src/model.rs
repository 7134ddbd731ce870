use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Classifier registration stored in the `ml_models` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct RegisteredModel {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

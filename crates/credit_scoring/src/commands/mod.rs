//! CLI command implementations.

use std::sync::Arc;

use anyhow::{Context, Result};
use config::Config;
use credit_scoring::ScoringPipeline;
use database::{PgAuditStore, PgModelRegistry};
use feature_extractor::{FeatureSchema, ImputationPolicy};
use ml_model::{CheckpointLoader, ModelCache};
use sqlx::PgPool;

pub mod migrate;
pub mod predict;
pub mod register;
pub mod serve;

/// Wires the pipeline to `PostgreSQL` and the checkpoint directory.
///
/// # Errors
///
/// Returns an error if the configured imputation policy is unknown.
pub fn build_pipeline(pool: &PgPool, config: &Config) -> Result<ScoringPipeline> {
    let imputation: ImputationPolicy = config
        .imputation_policy
        .parse()
        .map_err(anyhow::Error::msg)
        .context("Invalid IMPUTATION_POLICY")?;

    let loader = CheckpointLoader::new(&config.models_dir);

    Ok(ScoringPipeline::new(
        Arc::new(PgModelRegistry::new(pool.clone())),
        Arc::new(PgAuditStore::new(pool.clone())),
        Arc::new(ModelCache::new(Arc::new(loader))),
        FeatureSchema::credit_v1().with_imputation(imputation),
        config.decision_threshold,
    ))
}

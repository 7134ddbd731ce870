//! Serve command - runs the HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use config::Config;
use credit_scoring::{AppState, router};
use database::{PgModelRegistry, PgProfilingStore};
use sqlx::PgPool;
use tracing::info;

use super::build_pipeline;

/// Runs the serve command until the server stops.
///
/// # Errors
///
/// Returns an error if the pipeline cannot be built or the address cannot
/// be bound.
pub async fn run(pool: &PgPool, config: &Config, bind: &str) -> Result<()> {
    let pipeline = build_pipeline(pool, config)?;
    let mut state = AppState::new(
        Arc::new(pipeline),
        Arc::new(PgModelRegistry::new(pool.clone())),
    );
    if config.profiling_enabled {
        state = state.with_profiler(Arc::new(PgProfilingStore::new(pool.clone())));
    }

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    info!(
        address = bind,
        models_dir = %config.models_dir.display(),
        profiling = config.profiling_enabled,
        "Listening"
    );

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}

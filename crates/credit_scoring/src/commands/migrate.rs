//! Migrate command - applies pending schema migrations.

use anyhow::{Context, Result};
use database::run_migrations;
use sqlx::PgPool;
use tracing::info;

/// Runs the migrate command.
///
/// # Errors
///
/// Returns an error if a migration fails.
pub async fn run(pool: &PgPool) -> Result<()> {
    run_migrations(pool)
        .await
        .context("Failed to run migrations")?;
    info!("Migrations completed successfully");

    Ok(())
}

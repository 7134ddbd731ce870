//! Register command - adds or updates a model in the registry.

use anyhow::Result;
use database::insert_model;
use sqlx::PgPool;
use tracing::info;

/// Runs the register command.
///
/// # Errors
///
/// Returns an error if the registry cannot be written.
pub async fn run(
    pool: &PgPool,
    name: &str,
    version: Option<&str>,
    description: Option<&str>,
    inactive: bool,
) -> Result<()> {
    let model = insert_model(pool, name, description, version, !inactive).await?;

    info!(
        model = %model.name,
        id = %model.id,
        version = model.version.as_deref().unwrap_or("-"),
        active = model.is_active,
        "Model registered"
    );

    Ok(())
}

//! Persistence for the credit-scoring service.
//!
//! Exposes the model registry, the append-only audit trail of inputs and
//! outputs, and request profiles as traits, with `PostgreSQL`
//! implementations and an in-memory implementation for tests.

use async_trait::async_trait;
use scoring_structs::{NewInputRecord, NewOutputRecord, NewProfilingLog, RegisteredModel};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod audit;
mod memory;
mod ml_input;
mod ml_output;
mod model;
mod profiling_log;

pub use audit::{PgAuditStore, PgAuditTransaction};
pub use memory::{FailurePoint, MemoryStore};
pub use ml_input::insert_inputs;
pub use ml_output::insert_outputs;
pub use model::{PgModelRegistry, insert_model};
pub use profiling_log::{PgProfilingStore, insert_profiling_log};

/// Creates a connection pool to the `PostgreSQL` database.
///
/// # Errors
///
/// Returns an error if the connection to the database fails.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Runs all pending migrations.
///
/// # Errors
///
/// Returns an error if running migrations fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Lookup of registered classifiers.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Finds a model by name, active or not.
    async fn find_model(&self, name: &str) -> Result<Option<RegisteredModel>, sqlx::Error>;

    /// Lists all registered models ordered by name.
    async fn list_models(&self) -> Result<Vec<RegisteredModel>, sqlx::Error>;
}

/// Source of audit transactions.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Opens a transaction. Nothing written through it is visible until
    /// [`AuditTransaction::commit`].
    async fn begin(&self) -> Result<Box<dyn AuditTransaction>, sqlx::Error>;
}

/// One atomic unit of audit writes.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait AuditTransaction: Send {
    /// Inserts all inputs, returning their generated ids in input order.
    async fn insert_inputs(&mut self, inputs: &[NewInputRecord]) -> Result<Vec<Uuid>, sqlx::Error>;

    /// Inserts all outputs, returning their generated ids in input order.
    async fn insert_outputs(
        &mut self,
        outputs: &[NewOutputRecord],
    ) -> Result<Vec<Uuid>, sqlx::Error>;

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error>;

    async fn rollback(self: Box<Self>) -> Result<(), sqlx::Error>;
}

/// Sink for request profiles.
#[async_trait]
pub trait ProfilingStore: Send + Sync {
    async fn record_profile(&self, profile: &NewProfilingLog) -> Result<Uuid, sqlx::Error>;
}

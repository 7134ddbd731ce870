//! `PostgreSQL` audit trail.

use async_trait::async_trait;
use scoring_structs::{NewInputRecord, NewOutputRecord};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{AuditStore, AuditTransaction, ml_input, ml_output};

/// Audit store writing to `ml_inputs` and `ml_outputs`.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn begin(&self) -> Result<Box<dyn AuditTransaction>, sqlx::Error> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgAuditTransaction { tx }))
    }
}

/// Open database transaction for one batch.
pub struct PgAuditTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AuditTransaction for PgAuditTransaction {
    async fn insert_inputs(&mut self, inputs: &[NewInputRecord]) -> Result<Vec<Uuid>, sqlx::Error> {
        ml_input::insert_inputs(&mut self.tx, inputs).await
    }

    async fn insert_outputs(
        &mut self,
        outputs: &[NewOutputRecord],
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        ml_output::insert_outputs(&mut self.tx, outputs).await
    }

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}

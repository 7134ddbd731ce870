//! In-process store implementing every persistence trait.
//!
//! Writes are staged per transaction and only become visible on commit,
//! and outputs must reference a known input, mirroring the foreign key on
//! `ml_outputs`. Used by tests and offline scoring.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use scoring_structs::{
    InputRecord, NewInputRecord, NewOutputRecord, NewProfilingLog, OutputRecord, RegisteredModel,
};
use uuid::Uuid;

use crate::{AuditStore, AuditTransaction, ModelRegistry, ProfilingStore};

/// Operation at which a [`MemoryStore`] should report an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    Registry,
    Begin,
    InsertInputs,
    InsertOutputs,
    Commit,
    Profile,
}

#[derive(Debug, Default)]
struct State {
    models: Vec<RegisteredModel>,
    inputs: Vec<InputRecord>,
    outputs: Vec<OutputRecord>,
    profiles: Vec<NewProfilingLog>,
    failure: Option<FailurePoint>,
}

impl State {
    fn check(&self, point: FailurePoint) -> Result<(), sqlx::Error> {
        if self.failure == Some(point) {
            return Err(sqlx::Error::Protocol(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an active model.
    #[must_use]
    pub fn with_model(self, name: &str, version: Option<&str>) -> Self {
        self.register(name, version, true);
        self
    }

    /// Registers an inactive model.
    #[must_use]
    pub fn with_inactive_model(self, name: &str) -> Self {
        self.register(name, None, false);
        self
    }

    fn register(&self, name: &str, version: Option<&str>, is_active: bool) {
        self.state().models.push(RegisteredModel {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            description: None,
            version: version.map(str::to_owned),
            is_active,
            created_at: Utc::now(),
        });
    }

    /// Makes every later call at `point` fail. `None` clears the failure.
    pub fn fail_at(&self, point: Option<FailurePoint>) {
        self.state().failure = point;
    }

    #[must_use]
    pub fn inputs(&self) -> Vec<InputRecord> {
        self.state().inputs.clone()
    }

    #[must_use]
    pub fn outputs(&self) -> Vec<OutputRecord> {
        self.state().outputs.clone()
    }

    #[must_use]
    pub fn profiles(&self) -> Vec<NewProfilingLog> {
        self.state().profiles.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ModelRegistry for MemoryStore {
    async fn find_model(&self, name: &str) -> Result<Option<RegisteredModel>, sqlx::Error> {
        let state = self.state();
        state.check(FailurePoint::Registry)?;
        Ok(state.models.iter().find(|m| m.name == name).cloned())
    }

    async fn list_models(&self) -> Result<Vec<RegisteredModel>, sqlx::Error> {
        let state = self.state();
        state.check(FailurePoint::Registry)?;
        let mut models = state.models.clone();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn AuditTransaction>, sqlx::Error> {
        self.state().check(FailurePoint::Begin)?;
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }))
    }
}

#[async_trait]
impl ProfilingStore for MemoryStore {
    async fn record_profile(&self, profile: &NewProfilingLog) -> Result<Uuid, sqlx::Error> {
        let mut state = self.state();
        state.check(FailurePoint::Profile)?;
        state.profiles.push(profile.clone());
        Ok(Uuid::new_v4())
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    inputs: Vec<InputRecord>,
    outputs: Vec<OutputRecord>,
}

#[async_trait]
impl AuditTransaction for MemoryTransaction {
    async fn insert_inputs(&mut self, inputs: &[NewInputRecord]) -> Result<Vec<Uuid>, sqlx::Error> {
        self.store.state().check(FailurePoint::InsertInputs)?;
        let ids: Vec<Uuid> = inputs.iter().map(|_| Uuid::new_v4()).collect();
        self.inputs.extend(
            ids.iter()
                .zip(inputs)
                .map(|(id, input)| InputRecord::from_new(*id, input.clone())),
        );
        Ok(ids)
    }

    async fn insert_outputs(
        &mut self,
        outputs: &[NewOutputRecord],
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        self.store.state().check(FailurePoint::InsertOutputs)?;
        let ids: Vec<Uuid> = outputs.iter().map(|_| Uuid::new_v4()).collect();
        self.outputs.extend(
            ids.iter()
                .zip(outputs)
                .map(|(id, output)| OutputRecord::from_new(*id, output.clone())),
        );
        Ok(ids)
    }

    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        let Self {
            store,
            inputs,
            outputs,
        } = *self;
        let mut state = store.state();
        state.check(FailurePoint::Commit)?;

        let known = |id: Uuid| {
            inputs.iter().any(|i| i.id == id) || state.inputs.iter().any(|i| i.id == id)
        };
        if let Some(orphan) = outputs.iter().find(|o| !known(o.input_id)) {
            return Err(sqlx::Error::Protocol(format!(
                "output references unknown input {}",
                orphan.input_id
            )));
        }

        state.inputs.extend(inputs);
        state.outputs.extend(outputs);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

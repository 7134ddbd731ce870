//! Process-wide cache of loaded classifiers, keyed by model name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::Classifier;
use crate::network::load_checkpoint;

/// Loads a classifier by model name.
pub trait ModelLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the model cannot be found or decoded.
    fn load(&self, name: &str) -> Result<Arc<dyn Classifier>>;
}

/// Loads network checkpoints from a directory.
#[derive(Debug, Clone)]
pub struct CheckpointLoader {
    models_dir: PathBuf,
}

impl CheckpointLoader {
    #[must_use]
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }
}

impl ModelLoader for CheckpointLoader {
    fn load(&self, name: &str) -> Result<Arc<dyn Classifier>> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            anyhow::bail!("invalid model name '{name}'");
        }

        let classifier = load_checkpoint(&self.models_dir, name)
            .with_context(|| format!("Failed to load checkpoint '{name}'"))?;
        Ok(Arc::new(classifier))
    }
}

/// Lazily populated, read-mostly cache of classifiers.
pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    models: RwLock<HashMap<String, Arc<dyn Classifier>>>,
}

impl ModelCache {
    #[must_use]
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached classifier for `name`, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns the loader's error; failed loads are not cached.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn Classifier>> {
        if let Some(model) = self.models.read().await.get(name) {
            debug!(model = name, "Model cache hit");
            return Ok(Arc::clone(model));
        }

        let loader = Arc::clone(&self.loader);
        let owned_name = name.to_owned();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&owned_name))
            .await
            .context("Model loading task failed")??;

        let mut models = self.models.write().await;
        // Another request may have loaded it while we were waiting.
        let model = models
            .entry(name.to_owned())
            .or_insert_with(|| {
                info!(model = name, "Model loaded");
                loaded
            })
            .clone();

        Ok(model)
    }

    /// Drops the cached entry for `name`, returning whether one existed.
    pub async fn invalidate(&self, name: &str) -> bool {
        self.models.write().await.remove(name).is_some()
    }

    /// Number of classifiers currently loaded.
    pub async fn len(&self) -> usize {
        self.models.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.models.read().await.is_empty()
    }
}

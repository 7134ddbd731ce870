//! Feed-forward network classifier built on Burn, and its checkpoint format.
//!
//! A checkpoint is two files side by side: `{name}.mpk` with the network
//! weights and `{name}.config.json` with the [`NetworkConfig`] describing
//! how records are encoded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use burn::backend::NdArray;
use burn::backend::ndarray::NdArrayDevice;
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::activation::softmax;
use scoring_structs::{Cell, ModelInput};
use serde::{Deserialize, Serialize};

use crate::{Classifier, DEFAULT_CLASSES};

type Backend = NdArray;

/// Encoding and architecture of a saved network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Numeric columns fed as-is, in input order.
    pub numeric_columns: Vec<String>,
    /// Categorical columns, each one-hot encoded over its vocabulary.
    #[serde(default)]
    pub categorical_vocabulary: BTreeMap<String, Vec<String>>,
    /// Number of hidden units.
    pub hidden_size: usize,
    /// Class labels in output order.
    #[serde(default = "default_classes")]
    pub classes: Vec<i64>,
}

fn default_classes() -> Vec<i64> {
    DEFAULT_CLASSES.to_vec()
}

impl NetworkConfig {
    /// Width of the encoded input.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.numeric_columns.len()
            + self
                .categorical_vocabulary
                .values()
                .map(Vec::len)
                .sum::<usize>()
    }

    /// Encodes one record. Absent or non-finite numbers become 0; unknown
    /// categories encode as all zeros.
    #[expect(clippy::cast_possible_truncation, reason = "network runs in f32")]
    #[must_use]
    pub fn encode(&self, row: &ModelInput) -> Vec<f32> {
        let mut encoded = Vec::with_capacity(self.input_size());

        for column in &self.numeric_columns {
            let value = row
                .get(column)
                .and_then(Cell::as_number)
                .filter(|v| v.is_finite())
                .unwrap_or(0.0);
            encoded.push(value as f32);
        }

        for (column, vocabulary) in &self.categorical_vocabulary {
            let category = row.get(column).and_then(Cell::as_text);
            encoded.extend(
                vocabulary
                    .iter()
                    .map(|v| if Some(v.as_str()) == category { 1.0 } else { 0.0 }),
            );
        }

        encoded
    }
}

/// Two-layer perceptron producing class logits.
#[derive(Module, Debug)]
pub struct ScoringNetwork<B: burn::tensor::backend::Backend> {
    hidden: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: burn::tensor::backend::Backend> ScoringNetwork<B> {
    /// Creates a freshly initialised network for the given configuration.
    pub fn new(device: &B::Device, config: &NetworkConfig) -> Self {
        Self {
            hidden: LinearConfig::new(config.input_size(), config.hidden_size).init(device),
            output: LinearConfig::new(config.hidden_size, config.classes.len()).init(device),
            activation: Relu::new(),
        }
    }

    /// Forward pass returning class probabilities.
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape [`batch_size`, `input_size`]
    ///
    /// # Returns
    ///
    /// Tensor of shape [`batch_size`, `classes`] whose rows sum to 1.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.hidden.forward(input);
        let x = self.activation.forward(x);
        softmax(self.output.forward(x), 1)
    }
}

/// A loaded network together with its encoding.
pub struct NetworkClassifier {
    network: Mutex<ScoringNetwork<Backend>>,
    config: NetworkConfig,
    device: NdArrayDevice,
}

impl NetworkClassifier {
    #[must_use]
    pub fn new(network: ScoringNetwork<Backend>, config: NetworkConfig) -> Self {
        Self {
            network: Mutex::new(network),
            config,
            device: NdArrayDevice::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }
}

impl Classifier for NetworkClassifier {
    fn classes(&self) -> Option<&[i64]> {
        Some(&self.config.classes)
    }

    fn predict_proba(&self, rows: &[ModelInput]) -> Result<Vec<Vec<f64>>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let width = self.config.input_size();
        let features: Vec<f32> = rows.iter().flat_map(|row| self.config.encode(row)).collect();
        let input = Tensor::<Backend, 1>::from_floats(features.as_slice(), &self.device)
            .reshape([rows.len(), width]);

        let output = {
            let network = self
                .network
                .lock()
                .map_err(|_| anyhow::anyhow!("network lock poisoned"))?;
            network.forward(input)
        };

        let probabilities: Vec<f32> = output
            .into_data()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("failed to read network output: {e:?}"))?;

        Ok(probabilities
            .chunks(self.config.classes.len().max(1))
            .map(|row| row.iter().map(|&p| f64::from(p)).collect())
            .collect())
    }
}

fn checkpoint_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (dir.join(name), dir.join(format!("{name}.config.json")))
}

/// Saves a network and its configuration under `dir`.
///
/// # Errors
///
/// Returns an error if either file cannot be written.
pub fn save_checkpoint(
    network: ScoringNetwork<Backend>,
    config: &NetworkConfig,
    dir: &Path,
    name: &str,
) -> Result<()> {
    let (weights_path, config_path) = checkpoint_paths(dir, name);

    let config_json = serde_json::to_string_pretty(config)?;
    std::fs::write(&config_path, config_json)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    network
        .save_file(weights_path, &recorder)
        .map_err(|e| anyhow::anyhow!("Failed to save weights for '{name}': {e:?}"))?;

    Ok(())
}

/// Loads the checkpoint named `name` from `dir`.
///
/// # Errors
///
/// Returns an error if the configuration or weights are missing or invalid.
pub fn load_checkpoint(dir: &Path, name: &str) -> Result<NetworkClassifier> {
    let (weights_path, config_path) = checkpoint_paths(dir, name);

    let config_json = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let config: NetworkConfig = serde_json::from_str(&config_json)
        .with_context(|| format!("Invalid network config {}", config_path.display()))?;

    if config.classes.is_empty() || config.hidden_size == 0 {
        anyhow::bail!("network config for '{name}' has no classes or no hidden units");
    }

    let device = NdArrayDevice::default();
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let network = ScoringNetwork::<Backend>::new(&device, &config)
        .load_file(weights_path, &recorder, &device)
        .map_err(|e| anyhow::anyhow!("Failed to load weights for '{name}': {e:?}"))?;

    Ok(NetworkClassifier::new(network, config))
}

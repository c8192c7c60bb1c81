//! Training hyperparameters.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Hyperparameters of the training loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub num_epochs: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    /// Learning rate at epoch `e` is `learning_rate / (1 + decay_rate * e)`.
    pub decay_rate: f64,
    /// Upper bound on `sentences * longest sentence` per batch.
    pub batch_tokens: usize,
    /// Characters kept per word.
    pub max_char_length: usize,
    /// Map every ASCII digit to `0` before vocabulary lookup.
    pub normalize_digits: bool,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_epochs: 200,
            learning_rate: 0.01,
            momentum: 0.9,
            decay_rate: 0.05,
            batch_tokens: 512,
            max_char_length: 45,
            normalize_digits: true,
            seed: 1234,
        }
    }
}

impl TrainConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading train config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing train config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.num_epochs = epochs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_batch_tokens(mut self, batch_tokens: usize) -> Self {
        self.batch_tokens = batch_tokens;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.learning_rate > 0.0, "learning_rate must be positive");
        ensure!(
            (0.0..1.0).contains(&self.momentum),
            "momentum must be in [0, 1)"
        );
        ensure!(self.decay_rate >= 0.0, "decay_rate must be non-negative");
        ensure!(self.batch_tokens > 0, "batch_tokens must be positive");
        ensure!(self.max_char_length > 0, "max_char_length must be positive");
        Ok(())
    }

    /// Learning rate for a zero-based epoch index.
    pub fn learning_rate_at(&self, epoch: usize) -> f64 {
        self.learning_rate / (1.0 + self.decay_rate * epoch as f64)
    }
}

/// Input and output locations of a training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPaths {
    pub train: PathBuf,
    pub dev: PathBuf,
    pub test: PathBuf,
    /// GloVe-format text file. Without it the word table is random.
    pub embeddings: Option<PathBuf>,
    /// Receives checkpoints, vocabularies and prediction files.
    pub output_dir: PathBuf,
    /// `conlleval`-style script. Without it chunk F1 is computed natively.
    pub eval_script: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_learning_rate_decay() {
        let config = TrainConfig::default();
        assert_eq!(config.learning_rate_at(0), 0.01);
        assert!((config.learning_rate_at(10) - 0.01 / 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(TrainConfig::default().with_batch_tokens(0).validate().is_err());
        assert!(TrainConfig::default().with_learning_rate(0.0).validate().is_err());
        let mut config = TrainConfig::default();
        config.momentum = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: TrainConfig =
            serde_json::from_str(r#"{"num_epochs": 3, "normalize_digits": false}"#).unwrap();
        assert_eq!(config.num_epochs, 3);
        assert!(!config.normalize_digits);
        assert_eq!(config.max_char_length, 45);
    }
}

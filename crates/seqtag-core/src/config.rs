//! # Model Configuration
//!
//! Hyperparameters of the BiLSTM-CNN-CRF tagger, loadable from JSON.

use std::path::Path;

use candle_nn::Init;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqtagError};
use crate::tagging::{ConstraintMask, TagScheme};

/// Character embedding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharEmbeddingConfig {
    pub dim: usize,
}

impl Default for CharEmbeddingConfig {
    fn default() -> Self {
        Self { dim: 30 }
    }
}

/// Character-level convolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharCnnConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub padding: usize,
}

impl Default for CharCnnConfig {
    fn default() -> Self {
        Self {
            in_channels: 30,
            out_channels: 30,
            kernel_size: 3,
            padding: 2,
        }
    }
}

/// Sentence encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Word embedding dim + char filters.
    pub input_size: usize,
    /// Hidden units per direction.
    pub num_units: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            input_size: 130,
            num_units: 128,
        }
    }
}

/// Weight initializer applied by `reset_parameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitializerConfig {
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, stdev: f64 },
    KaimingUniform,
    KaimingNormal,
}

impl InitializerConfig {
    pub fn to_init(&self) -> Init {
        match *self {
            InitializerConfig::Uniform { low, high } => Init::Uniform { lo: low, up: high },
            InitializerConfig::Normal { mean, stdev } => Init::Randn { mean, stdev },
            InitializerConfig::KaimingUniform => candle_nn::init::DEFAULT_KAIMING_UNIFORM,
            InitializerConfig::KaimingNormal => candle_nn::init::DEFAULT_KAIMING_NORMAL,
        }
    }
}

/// Configuration of the BiLSTM-CNN-CRF model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Word embedding dimension (must match the pretrained table).
    pub word_dim: usize,
    pub char_emb: CharEmbeddingConfig,
    pub char_cnn_conv: CharCnnConfig,
    pub dropout_rate: f32,
    pub bilstm_sentence_encoder: EncoderConfig,
    pub output_hidden_size: usize,
    pub initializer: Option<InitializerConfig>,
    /// Scheme of the tag vocabulary.
    pub tag_scheme: TagScheme,
    /// Forbid ill-formed transitions of `tag_scheme` during decoding.
    pub constrain_decoding: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            word_dim: 100,
            char_emb: CharEmbeddingConfig::default(),
            char_cnn_conv: CharCnnConfig::default(),
            dropout_rate: 0.5,
            bilstm_sentence_encoder: EncoderConfig::default(),
            output_hidden_size: 128,
            initializer: None,
            tag_scheme: TagScheme::Bio,
            constrain_decoding: false,
        }
    }
}

impl ModelConfig {
    /// Create a model configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the word embedding dimension and keep the encoder input in sync.
    pub fn with_word_dim(mut self, dim: usize) -> Self {
        self.word_dim = dim;
        self.bilstm_sentence_encoder.input_size = dim + self.char_cnn_conv.out_channels;
        self
    }

    /// Set the character embedding dimension and the conv input channels.
    pub fn with_char_dim(mut self, dim: usize) -> Self {
        self.char_emb.dim = dim;
        self.char_cnn_conv.in_channels = dim;
        self
    }

    /// Set the number of character filters and keep the encoder input in sync.
    pub fn with_char_filters(mut self, filters: usize) -> Self {
        self.char_cnn_conv.out_channels = filters;
        self.bilstm_sentence_encoder.input_size = self.word_dim + filters;
        self
    }

    pub fn with_hidden_units(mut self, units: usize) -> Self {
        self.bilstm_sentence_encoder.num_units = units;
        self
    }

    pub fn with_output_hidden_size(mut self, size: usize) -> Self {
        self.output_hidden_size = size;
        self
    }

    /// Set the dropout rate, clamped to `[0, 0.95]`.
    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout_rate = rate.clamp(0.0, 0.95);
        self
    }

    pub fn with_initializer(mut self, initializer: Option<InitializerConfig>) -> Self {
        self.initializer = initializer;
        self
    }

    pub fn with_tag_scheme(mut self, scheme: TagScheme, constrain: bool) -> Self {
        self.tag_scheme = scheme;
        self.constrain_decoding = constrain;
        self
    }

    /// Check that layer sizes agree with each other.
    pub fn validate(&self) -> Result<()> {
        if self.char_cnn_conv.in_channels != self.char_emb.dim {
            return Err(SeqtagError::InvalidConfig(format!(
                "char_cnn_conv.in_channels ({}) must equal char_emb.dim ({})",
                self.char_cnn_conv.in_channels, self.char_emb.dim
            )));
        }
        let expected_input = self.word_dim + self.char_cnn_conv.out_channels;
        if self.bilstm_sentence_encoder.input_size != expected_input {
            return Err(SeqtagError::InvalidConfig(format!(
                "encoder input_size ({}) must equal word_dim + char filters ({expected_input})",
                self.bilstm_sentence_encoder.input_size
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(SeqtagError::InvalidConfig(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        if self.bilstm_sentence_encoder.num_units == 0
            || self.output_hidden_size == 0
            || self.char_cnn_conv.kernel_size == 0
        {
            return Err(SeqtagError::InvalidConfig(
                "layer sizes must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Decoding constraints for a tag vocabulary, if enabled.
    pub fn constraints<S: AsRef<str>>(&self, labels: &[S]) -> Result<Option<ConstraintMask>> {
        if !self.constrain_decoding {
            return Ok(None);
        }
        let pairs = self.tag_scheme.allowed_transitions(labels)?;
        ConstraintMask::from_pairs(labels.len(), &pairs).map(Some)
    }
}

//! # Seqtag Trainer
//!
//! Training pipeline for the BiLSTM-CNN-CRF tagger: CoNLL-03 reading,
//! vocabularies, GloVe initialisation, token-budget batching, SGD with
//! learning-rate decay and per-epoch evaluation with checkpointing.

pub mod config;
pub mod data;
pub mod logging;
pub mod optim;
pub mod trainer;

pub use config::{DataPaths, TrainConfig};
pub use data::{Vocabularies, Vocabulary, read_conll03};
pub use optim::{MomentumSgd, SgdConfig};
pub use trainer::{Split, TrainSummary, Trainer, run_training};

//! # Seqtag
//!
//! Sequence tagging with a BiLSTM-CNN-CRF and span-level evaluation.
//!
//! - [`tagger`]: tag schemes, Viterbi, CRF, packed BiLSTM and the tagger model
//! - [`eval`]: span F1, SRL scoring and CoNLL scorers
//! - [`trainer`]: CoNLL-03 data pipeline and training loop

pub use seqtag_core as tagger;
pub use seqtag_eval as eval;
pub use seqtag_trainer as trainer;

pub use seqtag_core::{BiRecurrentConvCrf, ConditionalRandomField, ModelConfig, TagScheme};
pub use seqtag_eval::{F1Result, Span, compute_span_f1, compute_srl_f1};

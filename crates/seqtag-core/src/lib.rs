//! # Seqtag Core
//!
//! Building blocks of a BiLSTM-CNN-CRF sequence tagger on candle:
//! length-aware packing around recurrent layers, a linear-chain CRF with
//! constrained Viterbi decoding, and BIO/IOB1/BIOUL tag schemes.
//!
//! ## Quick Start
//!
//! ```rust
//! use seqtag_core::tagging::{ConstraintMask, TagScheme, ViterbiDecoder};
//!
//! let labels = ["O", "B-PER", "I-PER"];
//! let pairs = TagScheme::Bio.allowed_transitions(&labels).unwrap();
//! let mask = ConstraintMask::from_pairs(labels.len(), &pairs).unwrap();
//!
//! let emissions = vec![vec![0.0, 0.0, 5.0], vec![0.0, 0.0, 5.0]];
//! let transitions = vec![vec![0.0; 3]; 3];
//! let start = vec![0.0; 3];
//! let end = vec![0.0; 3];
//!
//! let decoder = ViterbiDecoder::new(labels.len());
//! let (path, _score) = decoder
//!     .decode_constrained(&emissions, &transitions, &start, &end, Some(&mask))
//!     .unwrap();
//!
//! // A sentence cannot open with I-PER under BIO.
//! assert_ne!(path[0], 2);
//! ```
pub mod config;
pub mod crf;
pub mod error;
pub mod nn;
pub mod tagging;

// Re-export primary API
pub use config::{CharCnnConfig, CharEmbeddingConfig, EncoderConfig, InitializerConfig, ModelConfig};
pub use crf::{ConditionalRandomField, log_sum_exp};
pub use error::{Result, SeqtagError};
pub use nn::{BiLstm, BiRecurrentConvCrf, PackedSequence, RecurrentState};
pub use tagging::{Chunk, ConstraintMask, TagScheme, ViterbiDecoder};

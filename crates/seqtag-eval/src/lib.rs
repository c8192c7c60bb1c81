//! # Seqtag Eval
//!
//! Scoring for sequence taggers and semantic role labelers: exact-match span
//! F1, SRL F1 with the CoNLL-2005 reference scorer, the CoNLL-2003
//! `conlleval` wrapper and fixed-width CoNLL tables.
//!
//! ## Quick Start
//!
//! ```rust
//! use seqtag_eval::{Span, compute_span_f1};
//!
//! let gold = vec![vec![Span::new(0, 1, "PER"), Span::new(3, 3, "LOC")]];
//! let pred = vec![vec![Span::new(0, 1, "PER"), Span::new(3, 3, "ORG")]];
//!
//! let result = compute_span_f1(&gold, &pred, "NER").unwrap();
//! assert_eq!(result.labeled.precision, 50.0);
//! assert_eq!(result.unlabeled.f1, 100.0);
//! ```
pub mod conll;
pub mod error;
pub mod scorer;
pub mod span;
pub mod span_f1;
pub mod srl;

// Re-export primary API
pub use conll::{ConllSentence, read_table, write_sentence};
pub use error::{EvalError, Result};
pub use scorer::{Conll03Evaluator, Conll03Score, OfficialScorer, chunk_f1};
pub use span::{FrameSet, Span};
pub use span_f1::{F1Result, LabelConfusions, SpanCounts, SpanF1, compute_span_f1};
pub use srl::{SrlEvalConfig, SrlF1, compute_srl_f1, print_to_conll, read_gold_predicates};

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while scoring predictions.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Two collections that must be aligned have different lengths.
    #[error("{what}: expected {expected} entries, found {found}")]
    LengthMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    /// A span or predicate position falls outside its sentence.
    #[error("invalid span {start}..={end} for a sentence of {len} tokens")]
    InvalidSpan { start: usize, end: usize, len: usize },

    /// An external scorer could not be started.
    #[error("failed to run {program:?}: {source}")]
    ScorerSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Scorer output held a field that is not a number.
    #[error("unexpected scorer output: {0}")]
    ScoreParse(String),

    /// A regex pattern failed to compile.
    #[error("regex compilation error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A fixed-width table row that no cell layout explains.
    #[error("malformed CoNLL row: {0:?}")]
    MalformedRow(String),

    #[error(transparent)]
    Tagging(#[from] seqtag_core::SeqtagError),
}

/// Result type alias for evaluation.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = EvalError::LengthMismatch {
            what: "predictions".into(),
            expected: 3,
            found: 2,
        };
        assert_eq!(err.to_string(), "predictions: expected 3 entries, found 2");

        let err = EvalError::InvalidSpan {
            start: 4,
            end: 9,
            len: 5,
        };
        assert!(err.to_string().contains("4..=9"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EvalError>();
    }
}

use thiserror::Error;

/// Errors that can occur during seqtag core operations.
#[derive(Debug, Error)]
pub enum SeqtagError {
    /// A tag string could not be split into prefix and entity.
    #[error("invalid tag {tag:?} for scheme {scheme}")]
    InvalidTag {
        /// The offending tag.
        tag: String,
        /// The scheme it was checked against.
        scheme: String,
    },

    /// An unknown tagging scheme name was requested.
    #[error("unknown tag scheme: {0}")]
    UnknownScheme(String),

    /// Score matrices do not agree with the tag set size.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The model configuration is inconsistent.
    #[error("invalid model config: {0}")]
    InvalidConfig(String),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid JSON for the expected schema.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("ML inference error: {0}")]
    CandleError(#[from] candle_core::Error),
}

/// Result type alias for seqtag operations.
pub type Result<T> = std::result::Result<T, SeqtagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = SeqtagError::UnknownScheme("BIOES2".into());
        assert_eq!(err.to_string(), "unknown tag scheme: BIOES2");

        let err = SeqtagError::InvalidTag {
            tag: "X-PER".into(),
            scheme: "BIO".into(),
        };
        assert!(err.to_string().contains("X-PER"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SeqtagError>();
    }
}

//! Labeled token spans.

use std::collections::BTreeMap;

use seqtag_core::tagging::Chunk;
use serde::{Deserialize, Serialize};

/// A labeled span over inclusive token positions.
///
/// Serialized as a `[start, end, label]` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(usize, usize, String)", into = "(usize, usize, String)")]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub label: String,
}

impl Span {
    pub fn new(start: usize, end: usize, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    /// Whether both spans cover the same tokens, ignoring labels.
    pub fn same_extent(&self, other: &Span) -> bool {
        self.start == other.start && self.end == other.end
    }
}

impl From<(usize, usize, String)> for Span {
    fn from((start, end, label): (usize, usize, String)) -> Self {
        Self { start, end, label }
    }
}

impl From<Span> for (usize, usize, String) {
    fn from(span: Span) -> Self {
        (span.start, span.end, span.label)
    }
}

impl From<Chunk> for Span {
    fn from(chunk: Chunk) -> Self {
        Self {
            start: chunk.start,
            end: chunk.end,
            label: chunk.label,
        }
    }
}

/// Arguments of every predicate in one sentence, keyed by predicate position.
pub type FrameSet = BTreeMap<usize, Vec<Span>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_triple() {
        let span = Span::new(2, 4, "ARG0");
        let json = serde_json::to_string(&span).unwrap();
        assert_eq!(json, r#"[2,4,"ARG0"]"#);

        let back: Span = serde_json::from_str(&json).unwrap();
        assert_eq!(back, span);
    }

    #[test]
    fn test_frame_set_from_json() {
        let frames: FrameSet =
            serde_json::from_str(r#"{"3": [[0, 1, "ARG0"], [4, 6, "ARG1"]]}"#).unwrap();
        assert_eq!(frames[&3].len(), 2);
        assert!(frames[&3][0].same_extent(&Span::new(0, 1, "ARG1")));
    }
}

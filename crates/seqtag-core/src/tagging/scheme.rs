//! # Tag Schemes for Sequence Labeling
//!
//! Chunk-encoding schemes (BIO, IOB1, BIOUL) for named entity recognition,
//! the transition constraints they imply for CRF decoding, and conversion of
//! tag sequences back into labeled chunks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqtagError};

/// Chunk encoding used by a tag vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TagScheme {
    /// `B-X` opens every chunk, `I-X` continues it.
    #[default]
    Bio,
    /// `I-X` opens a chunk, `B-X` only separates adjacent chunks of one type.
    Iob1,
    /// `U-X` single-token chunks, `L-X` closes multi-token chunks.
    Bioul,
}

/// Position marker of a tag inside a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagPrefix {
    Begin,
    Inside,
    Last,
    Unit,
    Outside,
}

impl TagPrefix {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'B' => Some(TagPrefix::Begin),
            'I' => Some(TagPrefix::Inside),
            'L' => Some(TagPrefix::Last),
            'U' => Some(TagPrefix::Unit),
            'O' => Some(TagPrefix::Outside),
            _ => None,
        }
    }
}

/// A tag split into its prefix and entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTag<'a> {
    pub prefix: TagPrefix,
    pub entity: Option<&'a str>,
}

/// A tag or one of the virtual sequence boundaries used by the CRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPosition<'a> {
    Start,
    End,
    Tag(ParsedTag<'a>),
}

/// A labeled chunk recovered from a tag sequence. `end` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub label: String,
    pub start: usize,
    pub end: usize,
}

/// Split a raw tag such as `B-PER` or `O` into prefix and entity.
///
/// Returns `None` if the prefix letter is unknown or a non-`O` tag lacks an
/// entity part.
pub fn parse_tag(tag: &str) -> Option<ParsedTag<'_>> {
    let mut chars = tag.chars();
    let prefix = TagPrefix::from_char(chars.next()?)?;
    let rest = chars.as_str();

    if prefix == TagPrefix::Outside {
        return rest.is_empty().then_some(ParsedTag {
            prefix,
            entity: None,
        });
    }

    let entity = rest.strip_prefix('-')?;
    if entity.is_empty() {
        return None;
    }
    Some(ParsedTag {
        prefix,
        entity: Some(entity),
    })
}

impl TagScheme {
    /// Prefixes that may appear in a tag vocabulary of this scheme.
    pub fn prefixes(&self) -> &'static [TagPrefix] {
        match self {
            TagScheme::Bio | TagScheme::Iob1 => {
                &[TagPrefix::Begin, TagPrefix::Inside, TagPrefix::Outside]
            }
            TagScheme::Bioul => &[
                TagPrefix::Begin,
                TagPrefix::Inside,
                TagPrefix::Last,
                TagPrefix::Unit,
                TagPrefix::Outside,
            ],
        }
    }

    /// Parse a tag and check that its prefix belongs to this scheme.
    pub fn parse<'a>(&self, tag: &'a str) -> Result<ParsedTag<'a>> {
        parse_tag(tag)
            .filter(|parsed| self.prefixes().contains(&parsed.prefix))
            .ok_or_else(|| SeqtagError::InvalidTag {
                tag: tag.to_string(),
                scheme: self.to_string(),
            })
    }

    /// Check if moving from `from` to `to` is a well-formed transition.
    pub fn is_transition_allowed(&self, from: TagPosition<'_>, to: TagPosition<'_>) -> bool {
        use TagPrefix::*;

        let (from, to) = match (from, to) {
            (_, TagPosition::Start) | (TagPosition::End, _) => return false,
            (TagPosition::Start, TagPosition::End) => return false,
            (TagPosition::Start, TagPosition::Tag(to)) => {
                return match self {
                    TagScheme::Bio => matches!(to.prefix, Outside | Begin),
                    TagScheme::Iob1 => matches!(to.prefix, Outside | Inside),
                    TagScheme::Bioul => matches!(to.prefix, Outside | Begin | Unit),
                };
            }
            (TagPosition::Tag(from), TagPosition::End) => {
                return match self {
                    TagScheme::Bio | TagScheme::Iob1 => true,
                    TagScheme::Bioul => matches!(from.prefix, Outside | Last | Unit),
                };
            }
            (TagPosition::Tag(from), TagPosition::Tag(to)) => (from, to),
        };

        let same_entity = from.entity.is_some() && from.entity == to.entity;
        match self {
            TagScheme::Bio => match to.prefix {
                Outside | Begin => true,
                Inside => matches!(from.prefix, Begin | Inside) && same_entity,
                _ => false,
            },
            TagScheme::Iob1 => match to.prefix {
                Outside | Inside => true,
                Begin => matches!(from.prefix, Begin | Inside) && same_entity,
                _ => false,
            },
            TagScheme::Bioul => match from.prefix {
                Outside | Last | Unit => matches!(to.prefix, Outside | Begin | Unit),
                Begin | Inside => matches!(to.prefix, Inside | Last) && same_entity,
            },
        }
    }

    /// Enumerate every allowed `(from, to)` index pair for a tag vocabulary.
    ///
    /// Index `labels.len()` stands for the sequence start and
    /// `labels.len() + 1` for the sequence end.
    pub fn allowed_transitions<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<(usize, usize)>> {
        let num_labels = labels.len();
        let mut positions = Vec::with_capacity(num_labels + 2);
        for label in labels {
            positions.push(TagPosition::Tag(self.parse(label.as_ref())?));
        }
        positions.push(TagPosition::Start);
        positions.push(TagPosition::End);

        let mut allowed = Vec::new();
        for (from_idx, from) in positions.iter().enumerate() {
            for (to_idx, to) in positions.iter().enumerate() {
                if self.is_transition_allowed(*from, *to) {
                    allowed.push((from_idx, to_idx));
                }
            }
        }
        Ok(allowed)
    }

    /// Recover labeled chunks from a tag sequence.
    ///
    /// BIO and IOB1 share decoding: a chunk opens on `B-X`, on `I-X` after a
    /// different entity, or on an `I-X` following `O`. BIOUL is decoded
    /// leniently, so stray `I-X`/`L-X` tags still produce chunks.
    pub fn tags_to_chunks<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        let mut active: Option<Chunk> = None;

        for (idx, tag) in tags.iter().enumerate() {
            let parsed = self.parse(tag.as_ref())?;
            let entity = parsed.entity.unwrap_or_default();
            let continues = active.as_ref().is_some_and(|chunk| chunk.label == entity);

            match (self, parsed.prefix) {
                (_, TagPrefix::Outside) => chunks.extend(active.take()),
                (_, TagPrefix::Inside) if continues => {
                    if let Some(chunk) = active.as_mut() {
                        chunk.end = idx;
                    }
                }
                (TagScheme::Bioul, TagPrefix::Last) if continues => {
                    if let Some(mut chunk) = active.take() {
                        chunk.end = idx;
                        chunks.push(chunk);
                    }
                }
                (TagScheme::Bioul, TagPrefix::Last | TagPrefix::Unit) => {
                    chunks.extend(active.take());
                    chunks.push(Chunk {
                        label: entity.to_string(),
                        start: idx,
                        end: idx,
                    });
                }
                _ => {
                    chunks.extend(active.take());
                    active = Some(Chunk {
                        label: entity.to_string(),
                        start: idx,
                        end: idx,
                    });
                }
            }
        }

        chunks.extend(active);
        Ok(chunks)
    }
}

impl fmt::Display for TagScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagScheme::Bio => write!(f, "BIO"),
            TagScheme::Iob1 => write!(f, "IOB1"),
            TagScheme::Bioul => write!(f, "BIOUL"),
        }
    }
}

impl FromStr for TagScheme {
    type Err = SeqtagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BIO" | "IOB2" => Ok(TagScheme::Bio),
            "IOB1" => Ok(TagScheme::Iob1),
            "BIOUL" | "BILOU" => Ok(TagScheme::Bioul),
            _ => Err(SeqtagError::UnknownScheme(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(s: &str) -> TagPosition<'_> {
        TagPosition::Tag(parse_tag(s).unwrap())
    }

    #[test]
    fn test_parse_tag() {
        let parsed = parse_tag("B-PER").unwrap();
        assert_eq!(parsed.prefix, TagPrefix::Begin);
        assert_eq!(parsed.entity, Some("PER"));

        let parsed = parse_tag("O").unwrap();
        assert_eq!(parsed.prefix, TagPrefix::Outside);
        assert_eq!(parsed.entity, None);

        assert!(parse_tag("X-PER").is_none());
        assert!(parse_tag("B").is_none());
        assert!(parse_tag("B-").is_none());
        assert!(parse_tag("").is_none());
    }

    #[test]
    fn test_scheme_rejects_foreign_prefix() {
        assert!(TagScheme::Bio.parse("U-PER").is_err());
        assert!(TagScheme::Bioul.parse("U-PER").is_ok());
    }

    #[test]
    fn test_bio_transitions() {
        let bio = TagScheme::Bio;
        assert!(bio.is_transition_allowed(tag("B-PER"), tag("I-PER")));
        assert!(bio.is_transition_allowed(tag("O"), tag("B-LOC")));
        assert!(bio.is_transition_allowed(tag("I-PER"), TagPosition::End));
        assert!(bio.is_transition_allowed(TagPosition::Start, tag("B-PER")));
        assert!(!bio.is_transition_allowed(tag("O"), tag("I-PER")));
        assert!(!bio.is_transition_allowed(tag("B-PER"), tag("I-LOC")));
        assert!(!bio.is_transition_allowed(TagPosition::Start, tag("I-PER")));
        assert!(!bio.is_transition_allowed(TagPosition::End, tag("O")));
    }

    #[test]
    fn test_iob1_transitions() {
        let iob1 = TagScheme::Iob1;
        assert!(iob1.is_transition_allowed(TagPosition::Start, tag("I-PER")));
        assert!(iob1.is_transition_allowed(tag("I-PER"), tag("B-PER")));
        assert!(!iob1.is_transition_allowed(tag("O"), tag("B-PER")));
        assert!(!iob1.is_transition_allowed(tag("I-LOC"), tag("B-PER")));
    }

    #[test]
    fn test_bioul_transitions() {
        let bioul = TagScheme::Bioul;
        assert!(bioul.is_transition_allowed(tag("B-PER"), tag("L-PER")));
        assert!(bioul.is_transition_allowed(tag("U-PER"), tag("B-LOC")));
        assert!(!bioul.is_transition_allowed(tag("B-PER"), tag("O")));
        assert!(!bioul.is_transition_allowed(tag("I-PER"), TagPosition::End));
        assert!(bioul.is_transition_allowed(tag("L-PER"), TagPosition::End));
    }

    #[test]
    fn test_allowed_transitions_indices() {
        let labels = ["O", "B-PER", "I-PER"];
        let allowed = TagScheme::Bio.allowed_transitions(&labels).unwrap();
        let start = labels.len();
        let end = labels.len() + 1;

        assert!(allowed.contains(&(start, 0)));
        assert!(allowed.contains(&(start, 1)));
        assert!(!allowed.contains(&(start, 2)));
        assert!(allowed.contains(&(1, 2)));
        assert!(!allowed.contains(&(0, 2)));
        assert!(allowed.contains(&(2, end)));
        assert!(!allowed.iter().any(|&(from, _)| from == end));
    }

    #[test]
    fn test_bio_chunks() {
        let tags = ["B-PER", "I-PER", "O", "B-LOC", "B-LOC", "I-ORG"];
        let chunks = TagScheme::Bio.tags_to_chunks(&tags).unwrap();
        let spans: Vec<_> = chunks
            .iter()
            .map(|c| (c.start, c.end, c.label.as_str()))
            .collect();
        assert_eq!(
            spans,
            vec![(0, 1, "PER"), (3, 3, "LOC"), (4, 4, "LOC"), (5, 5, "ORG")]
        );
    }

    #[test]
    fn test_iob1_chunks() {
        let tags = ["I-PER", "I-PER", "B-PER", "O", "I-LOC"];
        let chunks = TagScheme::Iob1.tags_to_chunks(&tags).unwrap();
        let spans: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(spans, vec![(0, 1), (2, 2), (4, 4)]);
    }

    #[test]
    fn test_bioul_chunks() {
        let tags = ["U-PER", "B-LOC", "I-LOC", "L-LOC", "O", "L-ORG"];
        let chunks = TagScheme::Bioul.tags_to_chunks(&tags).unwrap();
        let spans: Vec<_> = chunks
            .iter()
            .map(|c| (c.start, c.end, c.label.as_str()))
            .collect();
        assert_eq!(spans, vec![(0, 0, "PER"), (1, 3, "LOC"), (5, 5, "ORG")]);
    }

    #[test]
    fn test_scheme_from_str() {
        assert_eq!("bio".parse::<TagScheme>().unwrap(), TagScheme::Bio);
        assert_eq!("IOB1".parse::<TagScheme>().unwrap(), TagScheme::Iob1);
        assert_eq!("BILOU".parse::<TagScheme>().unwrap(), TagScheme::Bioul);
        assert!("XYZ".parse::<TagScheme>().is_err());
    }
}

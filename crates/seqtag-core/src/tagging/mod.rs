pub mod scheme;
pub mod viterbi;

pub use scheme::{Chunk, ParsedTag, TagPosition, TagPrefix, TagScheme, parse_tag};
pub use viterbi::{ConstraintMask, ViterbiDecoder};

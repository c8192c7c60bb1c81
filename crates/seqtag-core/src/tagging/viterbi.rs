//! # Viterbi Decoding for CRF
//!
//! Implements the Viterbi algorithm for finding the most likely tag sequence
//! given emission scores, transition scores, sequence boundary scores and an
//! optional set of allowed transitions.

use crate::error::{Result, SeqtagError};

/// Allowed transitions over `num_tags + 2` positions.
///
/// Row/column `num_tags` is the sequence start, `num_tags + 1` the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintMask {
    num_tags: usize,
    allowed: Vec<Vec<bool>>,
}

impl ConstraintMask {
    /// A mask that allows every transition.
    pub fn unconstrained(num_tags: usize) -> Self {
        Self {
            num_tags,
            allowed: vec![vec![true; num_tags + 2]; num_tags + 2],
        }
    }

    /// Build a mask from `(from, to)` pairs as produced by
    /// [`TagScheme::allowed_transitions`](crate::tagging::TagScheme::allowed_transitions).
    pub fn from_pairs(num_tags: usize, pairs: &[(usize, usize)]) -> Result<Self> {
        let size = num_tags + 2;
        let mut allowed = vec![vec![false; size]; size];
        for &(from, to) in pairs {
            if from >= size || to >= size {
                return Err(SeqtagError::DimensionMismatch(format!(
                    "transition ({from}, {to}) out of range for {num_tags} tags"
                )));
            }
            allowed[from][to] = true;
        }
        Ok(Self { num_tags, allowed })
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    pub fn start_index(&self) -> usize {
        self.num_tags
    }

    pub fn end_index(&self) -> usize {
        self.num_tags + 1
    }

    /// Whether `from -> to` is allowed. Indices past the tag set refer to
    /// the start/end positions.
    pub fn is_allowed(&self, from: usize, to: usize) -> bool {
        self.allowed[from][to]
    }
}

/// Viterbi decoder for CRF tag sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
}

impl ViterbiDecoder {
    /// Create a new Viterbi decoder.
    ///
    /// # Arguments
    /// * `num_tags` - Number of distinct tags
    pub fn new(num_tags: usize) -> Self {
        Self { num_tags }
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Decode the optimal tag sequence using only emission and transition scores.
    ///
    /// # Arguments
    /// * `emission_scores` - Matrix of shape [seq_len, num_tags] with emission scores
    /// * `transition_matrix` - Matrix of shape [num_tags, num_tags], `[from][to]`
    ///
    /// # Returns
    /// The optimal tag sequence as indices.
    pub fn decode(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
    ) -> Result<Vec<usize>> {
        let boundary = vec![0.0f32; self.num_tags];
        let (path, _) =
            self.decode_constrained(emission_scores, transition_matrix, &boundary, &boundary, None)?;
        Ok(path)
    }

    /// Decode with start/end scores and hard constraints.
    ///
    /// Disallowed transitions are never taken. Returns the path together with
    /// its total score; an empty input yields an empty path with score 0.
    pub fn decode_constrained(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_transitions: &[f32],
        end_transitions: &[f32],
        constraints: Option<&ConstraintMask>,
    ) -> Result<(Vec<usize>, f32)> {
        self.validate(
            emission_scores,
            transition_matrix,
            start_transitions,
            end_transitions,
            constraints,
        )?;

        let seq_len = emission_scores.len();
        if seq_len == 0 {
            return Ok((Vec::new(), 0.0));
        }

        let num_tags = self.num_tags;
        let allowed = |from: usize, to: usize| constraints.is_none_or(|mask| mask.is_allowed(from, to));

        // DP table
        let mut dp: Vec<Vec<f32>> = vec![vec![f32::NEG_INFINITY; num_tags]; seq_len];
        let mut backptr: Vec<Vec<Option<usize>>> = vec![vec![None; num_tags]; seq_len];

        // Initialize
        for tag in 0..num_tags {
            if allowed(num_tags, tag) {
                dp[0][tag] = start_transitions[tag] + emission_scores[0][tag];
            }
        }

        // Forward pass with constraints
        for pos in 1..seq_len {
            for curr_tag in 0..num_tags {
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = None;

                for prev_tag in 0..num_tags {
                    if !allowed(prev_tag, curr_tag) {
                        continue;
                    }

                    let score = dp[pos - 1][prev_tag] + transition_matrix[prev_tag][curr_tag];

                    if score > best_score {
                        best_score = score;
                        best_prev = Some(prev_tag);
                    }
                }

                dp[pos][curr_tag] = best_score + emission_scores[pos][curr_tag];
                backptr[pos][curr_tag] = best_prev;
            }
        }

        // Backtrack
        let mut best_final_tag = 0;
        let mut best_final_score = f32::NEG_INFINITY;
        for tag in 0..num_tags {
            if !allowed(tag, num_tags + 1) {
                continue;
            }
            let score = dp[seq_len - 1][tag] + end_transitions[tag];
            if score > best_final_score {
                best_final_score = score;
                best_final_tag = tag;
            }
        }

        let mut path = vec![best_final_tag];
        let mut curr_tag = best_final_tag;

        for pos in (1..seq_len).rev() {
            curr_tag = backptr[pos][curr_tag].unwrap_or(0);
            path.push(curr_tag);
        }

        path.reverse();
        Ok((path, best_final_score))
    }

    fn validate(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
        start_transitions: &[f32],
        end_transitions: &[f32],
        constraints: Option<&ConstraintMask>,
    ) -> Result<()> {
        let n = self.num_tags;
        if let Some(row) = emission_scores.iter().find(|row| row.len() != n) {
            return Err(SeqtagError::DimensionMismatch(format!(
                "emission score dimension: expected {n}, got {}",
                row.len()
            )));
        }
        if transition_matrix.len() != n || transition_matrix.iter().any(|row| row.len() != n) {
            return Err(SeqtagError::DimensionMismatch(format!(
                "transition matrix must be {n}x{n}"
            )));
        }
        if start_transitions.len() != n || end_transitions.len() != n {
            return Err(SeqtagError::DimensionMismatch(format!(
                "start/end transitions must have {n} entries"
            )));
        }
        if let Some(mask) = constraints {
            if mask.num_tags() != n {
                return Err(SeqtagError::DimensionMismatch(format!(
                    "constraint mask built for {} tags, decoder has {n}",
                    mask.num_tags()
                )));
            }
        }
        Ok(())
    }
}

//! # Span F1
//!
//! Exact-match precision, recall and F1 over labeled spans. Two spans match
//! when their start and end agree; a labeled match additionally needs equal
//! labels.

use std::collections::BTreeMap;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use tracing::info;

use crate::error::{EvalError, Result};
use crate::span::Span;

/// Precision, recall and F1 on a 0-100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct F1Result {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl F1Result {
    /// Scores from raw counts. Any zero denominator yields 0 for that score.
    pub fn from_counts(total_gold: usize, total_predicted: usize, total_matched: usize) -> Self {
        let precision = if total_predicted > 0 {
            100.0 * total_matched as f64 / total_predicted as f64
        } else {
            0.0
        };
        let recall = if total_gold > 0 {
            100.0 * total_matched as f64 / total_gold as f64
        } else {
            0.0
        };
        Self::from_precision_recall(precision, recall)
    }

    /// Harmonic mean of already computed precision and recall.
    pub fn from_precision_recall(precision: f64, recall: f64) -> Self {
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
        }
    }

    /// Like [`from_counts`](Self::from_counts), logging the scores under `message`.
    pub fn report(
        message: &str,
        total_gold: usize,
        total_predicted: usize,
        total_matched: usize,
    ) -> Self {
        let result = Self::from_counts(total_gold, total_predicted, total_matched);
        info!(
            "{message}: Precision: {}, Recall: {}, F1: {}",
            result.precision, result.recall, result.f1
        );
        result
    }
}

/// Counter of `(gold label, predicted label)` pairs over unlabeled matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelConfusions(BTreeMap<(String, String), usize>);

impl LabelConfusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, gold: &str, predicted: &str) {
        *self
            .0
            .entry((gold.to_string(), predicted.to_string()))
            .or_insert(0) += 1;
    }

    pub fn get(&self, gold: &str, predicted: &str) -> usize {
        self.0
            .get(&(gold.to_string(), predicted.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Total number of recorded pairs.
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, usize)> {
        self.0
            .iter()
            .map(|((gold, predicted), &count)| (gold.as_str(), predicted.as_str(), count))
    }

    /// Pairs sorted by descending count.
    pub fn most_common(&self) -> Vec<(&str, &str, usize)> {
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_by(|a, b| b.2.cmp(&a.2));
        pairs
    }
}

#[derive(Serialize)]
struct ConfusionEntry<'a> {
    gold: &'a str,
    predicted: &'a str,
    count: usize,
}

impl Serialize for LabelConfusions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (gold, predicted, count) in self.iter() {
            seq.serialize_element(&ConfusionEntry {
                gold,
                predicted,
                count,
            })?;
        }
        seq.end()
    }
}

/// Raw span counts behind an F1 computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpanCounts {
    pub gold: usize,
    pub predicted: usize,
    pub matched: usize,
    pub unlabeled_matched: usize,
}

impl SpanCounts {
    /// Compare every gold span with every predicted span of one sentence.
    pub fn update(&mut self, gold: &[Span], predicted: &[Span], confusions: &mut LabelConfusions) {
        self.gold += gold.len();
        self.predicted += predicted.len();
        self.match_spans(gold, predicted, confusions);
    }

    /// Count matches without touching the gold and predicted totals.
    pub fn match_spans(
        &mut self,
        gold: &[Span],
        predicted: &[Span],
        confusions: &mut LabelConfusions,
    ) -> usize {
        let mut labeled = 0;
        for a0 in gold {
            for a1 in predicted {
                if a0.same_extent(a1) {
                    self.unlabeled_matched += 1;
                    confusions.record(&a0.label, &a1.label);
                    if a0.label == a1.label {
                        labeled += 1;
                    }
                }
            }
        }
        self.matched += labeled;
        labeled
    }
}

/// Labeled and unlabeled F1 with the label confusions behind them.
#[derive(Debug, Clone, Serialize)]
pub struct SpanF1 {
    pub labeled: F1Result,
    pub unlabeled: F1Result,
    pub label_confusions: LabelConfusions,
    pub counts: SpanCounts,
}

/// Exact-match span F1 over aligned sentences.
///
/// `gold_data[i]` and `predictions[i]` hold the spans of sentence `i`. Scores
/// are logged under `task_name` and `"Unlabeled " + task_name`.
///
/// # Errors
///
/// Returns [`EvalError::LengthMismatch`] if the two collections differ in length.
pub fn compute_span_f1(
    gold_data: &[Vec<Span>],
    predictions: &[Vec<Span>],
    task_name: &str,
) -> Result<SpanF1> {
    if gold_data.len() != predictions.len() {
        return Err(EvalError::LengthMismatch {
            what: "predictions".into(),
            expected: gold_data.len(),
            found: predictions.len(),
        });
    }

    let mut counts = SpanCounts::default();
    let mut label_confusions = LabelConfusions::new();
    for (gold, pred) in gold_data.iter().zip(predictions) {
        counts.update(gold, pred, &mut label_confusions);
    }

    let labeled = F1Result::report(task_name, counts.gold, counts.predicted, counts.matched);
    let unlabeled = F1Result::report(
        &format!("Unlabeled {task_name}"),
        counts.gold,
        counts.predicted,
        counts.unlabeled_matched,
    );

    Ok(SpanF1 {
        labeled,
        unlabeled,
        label_confusions,
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(items: &[(usize, usize, &str)]) -> Vec<Span> {
        items
            .iter()
            .map(|&(start, end, label)| Span::new(start, end, label))
            .collect()
    }

    #[test]
    fn test_from_counts_zero_denominators() {
        let result = F1Result::from_counts(0, 0, 0);
        assert_eq!(result, F1Result::default());

        let result = F1Result::from_counts(5, 0, 0);
        assert_eq!(result.precision, 0.0);
        assert_eq!(result.recall, 0.0);
        assert_eq!(result.f1, 0.0);
    }

    #[test]
    fn test_from_counts_values() {
        let result = F1Result::from_counts(4, 2, 1);
        assert!((result.precision - 50.0).abs() < 1e-9);
        assert!((result.recall - 25.0).abs() < 1e-9);
        assert!((result.f1 - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_perfect_match() {
        let gold = vec![spans(&[(0, 1, "PER"), (3, 3, "LOC")]), spans(&[(2, 4, "ORG")])];
        let result = compute_span_f1(&gold, &gold.clone(), "NER").unwrap();
        assert_eq!(result.labeled.precision, 100.0);
        assert_eq!(result.labeled.recall, 100.0);
        assert_eq!(result.labeled.f1, 100.0);
        assert_eq!(result.label_confusions.get("PER", "PER"), 1);
    }

    #[test]
    fn test_disjoint_spans() {
        let gold = vec![spans(&[(0, 1, "PER")])];
        let pred = vec![spans(&[(2, 3, "PER")])];
        let result = compute_span_f1(&gold, &pred, "NER").unwrap();
        assert_eq!(result.counts.matched, 0);
        assert_eq!(result.counts.unlabeled_matched, 0);
        assert_eq!(result.labeled.f1, 0.0);
        assert!(result.label_confusions.is_empty());
    }

    #[test]
    fn test_unlabeled_at_least_labeled() {
        let gold = vec![spans(&[(0, 1, "PER"), (3, 4, "LOC"), (6, 6, "ORG")])];
        let pred = vec![spans(&[(0, 1, "ORG"), (3, 4, "LOC"), (5, 6, "ORG")])];
        let result = compute_span_f1(&gold, &pred, "NER").unwrap();

        assert_eq!(result.counts.matched, 1);
        assert_eq!(result.counts.unlabeled_matched, 2);
        assert!(result.unlabeled.f1 >= result.labeled.f1);
        assert_eq!(result.label_confusions.get("PER", "ORG"), 1);
        assert_eq!(result.label_confusions.total(), 2);
    }

    #[test]
    fn test_length_mismatch() {
        let gold = vec![spans(&[(0, 1, "PER")])];
        let err = compute_span_f1(&gold, &[], "NER").unwrap_err();
        assert!(matches!(err, EvalError::LengthMismatch { expected: 1, found: 0, .. }));
    }

    #[test]
    fn test_confusions_serialize_as_list() {
        let mut confusions = LabelConfusions::new();
        confusions.record("ARG0", "ARG1");
        confusions.record("ARG0", "ARG1");
        let json = serde_json::to_value(&confusions).unwrap();
        assert_eq!(json[0]["count"], 2);
        assert_eq!(json[0]["gold"], "ARG0");
        assert_eq!(confusions.most_common()[0], ("ARG0", "ARG1", 2));
    }
}

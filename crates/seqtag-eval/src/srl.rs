//! # SRL Evaluation
//!
//! Span F1 for PropBank-style semantic role labeling. Each sentence carries
//! a [`FrameSet`] mapping predicate positions to argument spans. Unofficial
//! scores are computed here; official scores come from the CoNLL-2005
//! `srl-eval.pl` script fed with the fixed-width files of [`print_to_conll`].

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conll::write_sentence;
use crate::error::{EvalError, Result};
use crate::scorer::OfficialScorer;
use crate::span::{FrameSet, Span};
use crate::span_f1::{F1Result, LabelConfusions, SpanCounts};

/// Gold labels that are not scored.
const IGNORED_GOLD_LABELS: [&str; 2] = ["V", "C-V"];
/// Predicted labels that are not scored.
const IGNORED_PRED_LABELS: [&str; 1] = ["V"];

/// Options of [`compute_srl_f1`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrlEvalConfig {
    /// Scorer for the official F1. `None` skips the official evaluation.
    pub scorer: Option<OfficialScorer>,
    /// Existing gold file in CoNLL format. Its first column supplies the
    /// gold predicate names written into the prediction file.
    pub gold_conll_path: Option<PathBuf>,
    /// Prefix of the `.gold` and `.pred` files, `<temp>/srl_pred_<pid>` by default.
    pub output_path: Option<PathBuf>,
}

impl SrlEvalConfig {
    pub fn with_scorer(mut self, scorer: OfficialScorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_gold_conll_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.gold_conll_path = Some(path.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Prefix used for the files handed to the scorer.
    pub fn output_prefix(&self) -> PathBuf {
        self.output_path.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("srl_pred_{}", std::process::id()))
        })
    }
}

/// Result of [`compute_srl_f1`].
#[derive(Debug, Clone, Serialize)]
pub struct SrlF1 {
    /// Labeled span F1 computed in-process.
    pub unofficial: F1Result,
    /// F1 from the official scorer, when one was configured.
    pub official: Option<F1Result>,
    pub unlabeled: F1Result,
    pub label_confusions: LabelConfusions,
    /// Sentences whose relations were all predicted, and nothing else.
    pub complete_sentences: usize,
    pub counts: SpanCounts,
}

/// Score predicted SRL frames against gold frames.
///
/// Gold arguments labeled `V` or `C-V` and predicted arguments labeled `V`
/// are not counted. A gold predicate missing from the prediction adds to the
/// gold total only.
///
/// # Errors
///
/// Returns [`EvalError::LengthMismatch`] if `gold_srl` and `predictions`
/// differ in length. Failures writing the CoNLL files, a scorer that cannot
/// be started, and a non-numeric score are errors as well.
pub fn compute_srl_f1<S: AsRef<str>>(
    sentences: &[Vec<S>],
    gold_srl: &[FrameSet],
    predictions: &[FrameSet],
    config: &SrlEvalConfig,
) -> Result<SrlF1> {
    if gold_srl.len() != predictions.len() {
        return Err(EvalError::LengthMismatch {
            what: "predicted frames".into(),
            expected: gold_srl.len(),
            found: predictions.len(),
        });
    }

    let mut counts = SpanCounts::default();
    let mut label_confusions = LabelConfusions::new();
    let mut complete_sentences = 0;

    for (gold, prediction) in gold_srl.iter().zip(predictions) {
        let mut gold_rels = 0;
        let mut pred_rels = 0;
        let mut matched = 0;

        for (pred_id, gold_args) in gold {
            let filtered_gold: Vec<Span> = gold_args
                .iter()
                .filter(|arg| !IGNORED_GOLD_LABELS.contains(&arg.label.as_str()))
                .cloned()
                .collect();
            counts.gold += filtered_gold.len();
            gold_rels += filtered_gold.len();

            let Some(pred_args) = prediction.get(pred_id) else {
                continue;
            };
            matched += counts.match_spans(&filtered_gold, pred_args, &mut label_confusions);
        }

        for args in prediction.values() {
            let scored = args
                .iter()
                .filter(|arg| !IGNORED_PRED_LABELS.contains(&arg.label.as_str()))
                .count();
            counts.predicted += scored;
            pred_rels += scored;
        }

        if gold_rels == matched && pred_rels == matched {
            complete_sentences += 1;
        }
    }

    let unofficial = F1Result::report(
        "SRL (unofficial)",
        counts.gold,
        counts.predicted,
        counts.matched,
    );
    let unlabeled = F1Result::report(
        "Unlabeled SRL (unofficial)",
        counts.gold,
        counts.predicted,
        counts.unlabeled_matched,
    );

    let official = match &config.scorer {
        Some(scorer) => Some(official_f1(sentences, gold_srl, predictions, config, scorer)?),
        None => None,
    };

    Ok(SrlF1 {
        unofficial,
        official,
        unlabeled,
        label_confusions,
        complete_sentences,
        counts,
    })
}

fn official_f1<S: AsRef<str>>(
    sentences: &[Vec<S>],
    gold_srl: &[FrameSet],
    predictions: &[FrameSet],
    config: &SrlEvalConfig,
    scorer: &OfficialScorer,
) -> Result<F1Result> {
    let prefix = config.output_prefix();

    let (gold_path, gold_predicates) = match &config.gold_conll_path {
        Some(path) => (path.clone(), Some(read_gold_predicates(path)?)),
        None => {
            let path = with_suffix(&prefix, ".gold");
            print_to_conll(sentences, gold_srl, &path, None)?;
            (path, None)
        }
    };

    let pred_path = with_suffix(&prefix, ".pred");
    print_to_conll(sentences, predictions, &pred_path, gold_predicates.as_deref())?;
    debug!(
        "scoring {} against {}",
        pred_path.display(),
        gold_path.display()
    );

    let result = scorer.evaluate(&gold_path, &pred_path)?;
    info!(
        "Official CoNLL Precision={}, Recall={}, Fscore={}",
        result.precision, result.recall, result.f1
    );
    Ok(result)
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// First column of every row of a CoNLL file, one list per sentence.
///
/// Every blank line starts a new sentence, so a trailing blank line leaves an
/// empty list at the end.
pub fn read_gold_predicates(path: &Path) -> Result<Vec<Vec<String>>> {
    let reader = BufReader::new(File::open(path)?);
    let mut gold_predicates = vec![Vec::new()];
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        match line.split_whitespace().next() {
            None => gold_predicates.push(Vec::new()),
            Some(first) => {
                if let Some(sentence) = gold_predicates.last_mut() {
                    sentence.push(first.to_string());
                }
            }
        }
    }
    Ok(gold_predicates)
}

/// Write SRL frames to `path` in the format read by `srl-eval.pl`.
pub fn print_to_conll<S: AsRef<str>>(
    sentences: &[Vec<S>],
    srl_labels: &[FrameSet],
    path: &Path,
    gold_predicates: Option<&[Vec<String>]>,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_conll(&mut writer, sentences, srl_labels, gold_predicates)?;
    writer.flush()?;
    Ok(())
}

/// Render SRL frames as fixed-width CoNLL columns.
///
/// The first column marks predicates (`P<word>`, or the gold predicate name
/// when one is known), every other column holds one predicate's bracketed
/// arguments. An argument overlapping one already written is dropped, and a
/// predicate no argument covers is marked `(V*)`.
pub fn write_conll<W: Write, S: AsRef<str>>(
    writer: &mut W,
    sentences: &[Vec<S>],
    srl_labels: &[FrameSet],
    gold_predicates: Option<&[Vec<String>]>,
) -> Result<()> {
    if srl_labels.len() < sentences.len() {
        return Err(EvalError::LengthMismatch {
            what: "SRL frames".into(),
            expected: sentences.len(),
            found: srl_labels.len(),
        });
    }

    for (sent_id, words) in sentences.iter().enumerate() {
        let len = words.len();
        let gold_sentence = match gold_predicates {
            Some(gold) => {
                let row = gold.get(sent_id).ok_or(EvalError::LengthMismatch {
                    what: "gold predicate sentences".into(),
                    expected: sentences.len(),
                    found: gold.len(),
                })?;
                if row.len() != len {
                    return Err(EvalError::LengthMismatch {
                        what: format!("gold predicates of sentence {sent_id}"),
                        expected: len,
                        found: row.len(),
                    });
                }
                Some(row)
            }
            None => None,
        };

        let pred_to_args = &srl_labels[sent_id];
        let mut props = vec!["-".to_string(); len];
        let mut col_labels = vec![vec!["*".to_string(); len]; pred_to_args.len()];

        for (column, (&pred_id, args)) in col_labels.iter_mut().zip(pred_to_args) {
            if pred_id >= len {
                return Err(EvalError::InvalidSpan {
                    start: pred_id,
                    end: pred_id,
                    len,
                });
            }
            props[pred_id] = match gold_sentence.map(|row| row[pred_id].as_str()) {
                Some(name) if name != "-" => name.to_string(),
                _ => format!("P{}", words[pred_id].as_ref()),
            };

            let mut covered = vec![false; len];
            for arg in args {
                if arg.start > arg.end || arg.end >= len {
                    return Err(EvalError::InvalidSpan {
                        start: arg.start,
                        end: arg.end,
                        len,
                    });
                }
                if covered[arg.start..=arg.end].iter().any(|&c| c) {
                    continue;
                }
                column[arg.start] = format!("({}{}", arg.label, column[arg.start]);
                column[arg.end].push(')');
                covered[arg.start..=arg.end].fill(true);
            }
            if !covered[pred_id] {
                column[pred_id] = "(V*)".to_string();
            }
        }

        write_sentence(writer, &props, &col_labels)?;
    }
    Ok(())
}

//! # External Scorers
//!
//! Wrappers around the reference evaluation scripts: the CoNLL-2005 SRL
//! scorer (`srl-eval.pl`) and the CoNLL-2003 `conlleval` script. Both run
//! synchronously and are read to completion. A native chunk F1 is provided
//! for runs without the scripts.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use regex::Regex;
use seqtag_core::tagging::TagScheme;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EvalError, Result};
use crate::span::Span;
use crate::span_f1::{F1Result, SpanF1, compute_span_f1};

/// Default location of the CoNLL-2005 scorer.
pub const DEFAULT_SRL_SCRIPT: &str = "scripts/srl-eval.pl";

/// Line of the scorer report holding the overall scores.
const SCORE_LINE: usize = 6;
/// Whitespace field of that line holding the recall column.
const SCORE_FIELD: usize = 5;

/// The CoNLL-2005 `srl-eval.pl` scorer run through a Perl interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficialScorer {
    pub perl: PathBuf,
    pub script: PathBuf,
}

impl Default for OfficialScorer {
    fn default() -> Self {
        Self {
            perl: PathBuf::from("perl"),
            script: PathBuf::from(DEFAULT_SRL_SCRIPT),
        }
    }
}

impl OfficialScorer {
    pub fn new(perl: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            perl: perl.into(),
            script: script.into(),
        }
    }

    /// Run the scorer on two CoNLL files and return its standard output.
    ///
    /// Standard error is discarded. A non-zero exit status is logged and the
    /// output is still returned.
    pub fn run(&self, first: &Path, second: &Path) -> Result<String> {
        let output = Command::new(&self.perl)
            .arg(&self.script)
            .arg(first)
            .arg(second)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| EvalError::ScorerSpawn {
                program: self.perl.clone(),
                source,
            })?;

        if !output.status.success() {
            warn!(
                "{} exited with {}",
                self.script.display(),
                output.status
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Official precision, recall and F1.
    ///
    /// The scorer is run twice: gold against predictions gives recall,
    /// predictions against gold gives precision. If either report lacks the
    /// score line, all three scores are 0.
    pub fn evaluate(&self, gold_path: &Path, pred_path: &Path) -> Result<F1Result> {
        let recall_report = self.run(gold_path, pred_path)?;
        let precision_report = self.run(pred_path, gold_path)?;
        debug!("srl-eval report:\n{recall_report}");

        match (
            parse_overall_recall(&recall_report)?,
            parse_overall_recall(&precision_report)?,
        ) {
            (Some(recall), Some(precision)) => {
                Ok(F1Result::from_precision_recall(precision, recall))
            }
            _ => {
                warn!("Unable to get FScore. Skipping.");
                Ok(F1Result::default())
            }
        }
    }
}

/// Extract the overall recall from an `srl-eval.pl` report.
///
/// With the file arguments swapped the same column is the precision.
/// Returns `Ok(None)` when the report is too short or the line has too few
/// fields, and an error when the field is present but not a number.
pub fn parse_overall_recall(report: &str) -> Result<Option<f64>> {
    let Some(line) = report.trim().split('\n').nth(SCORE_LINE) else {
        return Ok(None);
    };
    let Some(field) = line.split_whitespace().nth(SCORE_FIELD) else {
        return Ok(None);
    };
    field
        .parse::<f64>()
        .map(Some)
        .map_err(|_| EvalError::ScoreParse(format!("recall field {field:?} in {line:?}")))
}

/// Scores reported by `conlleval`, all on a 0-100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Conll03Score {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// The CoNLL-2003 `conlleval` script.
#[derive(Debug, Clone)]
pub struct Conll03Evaluator {
    script: PathBuf,
    re_metric: Regex,
}

impl Conll03Evaluator {
    /// # Errors
    ///
    /// Returns `EvalError::RegexError` if the metric pattern fails to compile.
    pub fn new(script: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            script: script.into(),
            re_metric: Regex::new(r"^\s*([A-Za-z0-9]+)\s*:\s*(\S+?)%?\s*$")?,
        })
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Score a prediction file of `... gold pred` rows.
    ///
    /// The file is fed to the script on stdin and the report is written to
    /// `<file>.score`.
    pub fn evaluate(&self, output_file: &Path) -> Result<Conll03Score> {
        let mut score_file = output_file.as_os_str().to_owned();
        score_file.push(".score");
        let score_file = PathBuf::from(score_file);

        let status = Command::new(&self.script)
            .stdin(File::open(output_file)?)
            .stdout(File::create(&score_file)?)
            .status()
            .map_err(|source| EvalError::ScorerSpawn {
                program: self.script.clone(),
                source,
            })?;
        if !status.success() {
            warn!("{} exited with {status}", self.script.display());
        }

        let report = std::fs::read_to_string(&score_file)?;
        self.parse_report(&report)
    }

    /// Parse the second line of a report:
    /// `accuracy:  97.10%; precision:  88.10%; recall:  89.20%; FB1:  88.65`.
    pub fn parse_report(&self, report: &str) -> Result<Conll03Score> {
        let line = report
            .lines()
            .nth(1)
            .ok_or_else(|| EvalError::ScoreParse("conlleval report has no score line".into()))?;

        let mut values = Vec::with_capacity(4);
        for field in line.split(';').take(4) {
            let caps = self
                .re_metric
                .captures(field)
                .ok_or_else(|| EvalError::ScoreParse(format!("metric {field:?}")))?;
            let value = caps[2]
                .parse::<f64>()
                .map_err(|_| EvalError::ScoreParse(format!("metric {field:?}")))?;
            values.push(value);
        }

        match values[..] {
            [accuracy, precision, recall, f1] => Ok(Conll03Score {
                accuracy,
                precision,
                recall,
                f1,
            }),
            _ => Err(EvalError::ScoreParse(format!(
                "expected 4 metrics in {line:?}"
            ))),
        }
    }
}

/// Native CoNLL chunk F1 over `(gold tags, predicted tags)` sentences.
pub fn chunk_f1<S: AsRef<str>>(sentences: &[(Vec<S>, Vec<S>)], scheme: TagScheme) -> Result<SpanF1> {
    let mut gold = Vec::with_capacity(sentences.len());
    let mut predicted = Vec::with_capacity(sentences.len());
    for (gold_tags, pred_tags) in sentences {
        if gold_tags.len() != pred_tags.len() {
            return Err(EvalError::LengthMismatch {
                what: "predicted tags".into(),
                expected: gold_tags.len(),
                found: pred_tags.len(),
            });
        }
        gold.push(to_spans(scheme, gold_tags)?);
        predicted.push(to_spans(scheme, pred_tags)?);
    }
    compute_span_f1(&gold, &predicted, "NER")
}

fn to_spans<S: AsRef<str>>(scheme: TagScheme, tags: &[S]) -> Result<Vec<Span>> {
    Ok(scheme
        .tags_to_chunks(tags)?
        .into_iter()
        .map(Span::from)
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Shell stand-in for `srl-eval.pl`: the recall column is 80 when the
    /// first file is the `.gold` one and 60 otherwise. It exits non-zero.
    pub(crate) const ORDERED_REPORT: &str = r#"case "$1" in
  *.gold) recall=80.00 ;;
  *) recall=60.00 ;;
esac
cat <<EOF
Number of Sentences    :           1
Number of Propositions :           1
Percentage of perfect props :   0.00

              corr.  excess  missed    prec.    rec.      F1
------------------------------------------------------------
   Overall        4       1       1    70.00   $recall   75.00
EOF
exit 1
"#;

    /// Shell stand-in that prints nothing.
    pub(crate) const SILENT_REPORT: &str = "exit 0\n";

    /// A scorer running `body` through `/bin/sh`.
    pub(crate) fn script_scorer(name: &str, body: &str) -> OfficialScorer {
        let script = std::env::temp_dir().join(format!(
            "seqtag_scorer_{name}_{}.sh",
            std::process::id()
        ));
        std::fs::write(&script, body).unwrap();
        OfficialScorer::new("/bin/sh", script)
    }

    const SRL_REPORT: &str = "Number of Sentences    :           2
Number of Propositions :           3
Percentage of perfect props :  66.67

              corr.  excess  missed    prec.    rec.      F1
------------------------------------------------------------
   Overall        5       1       2    83.33   71.43   76.92
----------
";

    #[test]
    fn test_parse_overall_recall() {
        assert_eq!(parse_overall_recall(SRL_REPORT).unwrap(), Some(71.43));
    }

    #[test]
    fn test_parse_short_report() {
        assert_eq!(parse_overall_recall("usage: srl-eval.pl gold pred\n").unwrap(), None);
        assert_eq!(parse_overall_recall("").unwrap(), None);
    }

    #[test]
    fn test_parse_non_numeric() {
        let report = SRL_REPORT.replace("71.43", "n/a");
        assert!(matches!(
            parse_overall_recall(&report),
            Err(EvalError::ScoreParse(_))
        ));
    }

    #[test]
    fn test_missing_scorer_is_spawn_error() {
        let scorer = OfficialScorer::new("/nonexistent/perl-binary", DEFAULT_SRL_SCRIPT);
        let err = scorer
            .run(Path::new("a.gold"), Path::new("a.pred"))
            .unwrap_err();
        assert!(matches!(err, EvalError::ScorerSpawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_evaluate_reads_recall_then_precision() {
        let scorer = script_scorer("order", ORDERED_REPORT);
        let dir = std::env::temp_dir();

        let result = scorer
            .evaluate(&dir.join("dev.gold"), &dir.join("dev.pred"))
            .unwrap();
        assert_eq!(result.recall, 80.0);
        assert_eq!(result.precision, 60.0);
        assert!((result.f1 - 2.0 * 60.0 * 80.0 / 140.0).abs() < 1e-9);

        std::fs::remove_file(&scorer.script).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_evaluate_without_score_line_is_zero() {
        let scorer = script_scorer("silent", SILENT_REPORT);
        let dir = std::env::temp_dir();

        let result = scorer
            .evaluate(&dir.join("dev.gold"), &dir.join("dev.pred"))
            .unwrap();
        assert_eq!(result, F1Result::default());

        std::fs::remove_file(&scorer.script).ok();
    }

    #[test]
    fn test_parse_conlleval_report() {
        let evaluator = Conll03Evaluator::new("./conlleval").unwrap();
        let report = "processed 51362 tokens with 5942 phrases; found: 5985 phrases; correct: 5428.\n\
                      accuracy:  98.03%; precision:  90.69%; recall:  91.35%; FB1:  91.02\n";
        let score = evaluator.parse_report(report).unwrap();
        assert_eq!(score.accuracy, 98.03);
        assert_eq!(score.precision, 90.69);
        assert_eq!(score.recall, 91.35);
        assert_eq!(score.f1, 91.02);
    }

    #[test]
    fn test_parse_conlleval_report_malformed() {
        let evaluator = Conll03Evaluator::new("./conlleval").unwrap();
        assert!(evaluator.parse_report("only one line").is_err());
        assert!(evaluator.parse_report("header\naccuracy: 1%; precision: 2%\n").is_err());
    }

    #[test]
    fn test_chunk_f1_bio() {
        let sentences = vec![
            (
                vec!["B-PER", "I-PER", "O", "B-LOC"],
                vec!["B-PER", "I-PER", "O", "B-ORG"],
            ),
            (vec!["O", "B-MISC"], vec!["O", "B-MISC"]),
        ];
        let result = chunk_f1(&sentences, TagScheme::Bio).unwrap();
        assert_eq!(result.counts.gold, 3);
        assert_eq!(result.counts.matched, 2);
        assert_eq!(result.counts.unlabeled_matched, 3);
        assert!((result.labeled.f1 - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_chunk_f1_length_mismatch() {
        let sentences = vec![(vec!["O", "O"], vec!["O"])];
        assert!(chunk_f1(&sentences, TagScheme::Bio).is_err());
    }
}

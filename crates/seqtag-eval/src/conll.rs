//! Fixed-width CoNLL tables.
//!
//! One row per token: the token left-justified to [`COLUMN_WIDTH`], then
//! every label column right-justified to the same width. A blank line ends
//! each sentence.

use std::io::{BufRead, Write};

use crate::error::{EvalError, Result};

/// Minimum width of every cell.
pub const COLUMN_WIDTH: usize = 15;

/// Write one sentence. `label_columns[k][i]` is the label of token `i` in column `k`.
pub fn write_sentence<W, S, L>(writer: &mut W, tokens: &[S], label_columns: &[Vec<L>]) -> Result<()>
where
    W: Write,
    S: AsRef<str>,
    L: AsRef<str>,
{
    for column in label_columns {
        if column.len() != tokens.len() {
            return Err(EvalError::LengthMismatch {
                what: "label column".into(),
                expected: tokens.len(),
                found: column.len(),
            });
        }
    }

    for (i, token) in tokens.iter().enumerate() {
        write!(writer, "{:<width$}", token.as_ref(), width = COLUMN_WIDTH)?;
        for column in label_columns {
            write!(writer, "{:>width$}", column[i].as_ref(), width = COLUMN_WIDTH)?;
        }
        writeln!(writer)?;
    }
    writeln!(writer)?;
    Ok(())
}

/// A sentence read back from a fixed-width table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConllSentence {
    pub tokens: Vec<String>,
    /// One entry per label column, each as long as `tokens`.
    pub columns: Vec<Vec<String>>,
}

/// Read every sentence of a fixed-width table.
///
/// Cells are located by position, not by whitespace: the token cell spans
/// [`COLUMN_WIDTH`] characters, or exactly its text when longer, and every
/// label cell is the next [`COLUMN_WIDTH`] characters, or exactly its text
/// when that overflows. The number of label columns is taken from the
/// shortest row of each sentence. Cells are trimmed.
pub fn read_table<R: BufRead>(reader: R) -> Result<Vec<ConllSentence>> {
    let mut sentences = Vec::new();
    let mut rows: Vec<Vec<char>> = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            if !rows.is_empty() {
                sentences.push(parse_sentence(&std::mem::take(&mut rows))?);
            }
            continue;
        }
        rows.push(line.trim_end_matches('\r').chars().collect());
    }

    if !rows.is_empty() {
        sentences.push(parse_sentence(&rows)?);
    }
    Ok(sentences)
}

/// Split the rows of one sentence, preferring the most label columns that
/// every row can hold.
fn parse_sentence(rows: &[Vec<char>]) -> Result<ConllSentence> {
    let shortest = rows.iter().map(Vec::len).min().unwrap_or(0);
    let max_columns = (shortest / COLUMN_WIDTH).saturating_sub(1);
    let min_columns = max_columns.min(1);

    for num_columns in (min_columns..=max_columns).rev() {
        let parsed: Option<Vec<_>> = rows
            .iter()
            .map(|row| split_row(row, num_columns))
            .collect();
        let Some(parsed) = parsed else {
            continue;
        };

        let mut sentence = ConllSentence {
            tokens: Vec::with_capacity(rows.len()),
            columns: vec![Vec::with_capacity(rows.len()); num_columns],
        };
        for (token, labels) in parsed {
            sentence.tokens.push(token);
            for (column, label) in sentence.columns.iter_mut().zip(labels) {
                column.push(label);
            }
        }
        return Ok(sentence);
    }

    let bad_row = rows
        .iter()
        .find(|row| split_row(row, max_columns).is_none())
        .unwrap_or(&rows[0]);
    Err(EvalError::MalformedRow(
        bad_row.iter().collect::<String>().trim_end().to_string(),
    ))
}

fn split_row(row: &[char], num_columns: usize) -> Option<(String, Vec<String>)> {
    if num_columns == 0 {
        return Some((trimmed(row), Vec::new()));
    }
    let mut labels = Vec::with_capacity(num_columns);
    let token_end = split_labels(row, row.len(), num_columns, &mut labels)?;
    labels.reverse();
    Some((trimmed(&row[..token_end]), labels))
}

/// Peel `remaining` label cells off the right of `row[..end]`, narrowest
/// first, and return where the token cell ends.
fn split_labels(
    row: &[char],
    end: usize,
    remaining: usize,
    labels: &mut Vec<String>,
) -> Option<usize> {
    if remaining == 0 {
        return is_token_cell(&row[..end]).then_some(end);
    }

    // The token and the labels further left need a full cell each.
    let max_width = end.checked_sub(COLUMN_WIDTH * remaining)?;
    for width in COLUMN_WIDTH..=max_width {
        let cell = &row[end - width..end];
        if !is_label_cell(cell) {
            continue;
        }
        labels.push(trimmed(cell));
        if let Some(token_end) = split_labels(row, end - width, remaining - 1, labels) {
            return Some(token_end);
        }
        labels.pop();
    }
    None
}

/// A left-justified token: padded to the full width, or unpadded text.
fn is_token_cell(cell: &[char]) -> bool {
    if cell.len() <= COLUMN_WIDTH {
        return true;
    }
    matches!(
        (cell.first(), cell.last()),
        (Some(first), Some(last)) if !first.is_whitespace() && !last.is_whitespace()
    )
}

/// A right-justified label: padding then one word, or one over-long word.
fn is_label_cell(cell: &[char]) -> bool {
    let text_start = if cell.len() == COLUMN_WIDTH {
        cell.iter()
            .position(|c| !c.is_whitespace())
            .unwrap_or(cell.len())
    } else {
        0
    };
    cell[text_start..].iter().all(|c| !c.is_whitespace())
}

fn trimmed(cell: &[char]) -> String {
    cell.iter().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fixed_width_layout() {
        let mut out = Vec::new();
        write_sentence(&mut out, &["Pdrink", "-"], &[vec!["(V*)", "*"]]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.split('\n').collect();

        assert_eq!(lines[0], format!("{:<15}{:>15}", "Pdrink", "(V*)"));
        assert_eq!(lines[0].len(), 30);
        assert_eq!(lines[1], format!("{:<15}{:>15}", "-", "*"));
        assert_eq!(lines[2], "");
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_column_length_mismatch() {
        let mut out = Vec::new();
        let err = write_sentence(&mut out, &["a", "b"], &[vec!["*"]]).unwrap_err();
        assert!(matches!(err, EvalError::LengthMismatch { expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_table_round_trip() {
        let tokens = ["-", "Pbought", "-", "averyveryverylongtoken"];
        let columns = vec![
            vec!["(ARG0*)", "(V*)", "(ARG1*", "*)"],
            vec!["*", "*", "(ARGM-TMP-EXTRA-LONG*", "*)"],
        ];

        let mut out = Vec::new();
        write_sentence(&mut out, &tokens, &columns).unwrap();
        write_sentence(&mut out, &["x"], &[vec!["*"], vec!["*"]]).unwrap();

        let sentences = read_table(Cursor::new(out)).unwrap();
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].tokens, tokens);
        assert_eq!(sentences[0].columns, columns);
        assert_eq!(sentences[1].tokens, ["x"]);
    }

    #[test]
    fn test_read_table_without_labels() {
        let sentences = read_table(Cursor::new("a\nb\n\nc\n")).unwrap();
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].columns.is_empty());
        assert_eq!(sentences[1].tokens, ["c"]);
    }

    #[test]
    fn test_read_full_width_cells_side_by_side() {
        let tokens = ["fifteen_chars__", "x"];
        let columns = vec![vec!["(ARGM-ADV-LONG*", "*)"]];

        let mut out = Vec::new();
        write_sentence(&mut out, &tokens, &columns).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("fifteen_chars__(ARGM-ADV-LONG*\n"));

        let sentences = read_table(Cursor::new(out)).unwrap();
        assert_eq!(sentences[0].tokens, tokens);
        assert_eq!(sentences[0].columns, columns);
    }

    #[test]
    fn test_read_empty_label_cells() {
        let tokens = ["a", "b"];
        let columns = vec![vec!["", "*"], vec!["X", "Y"]];

        let mut out = Vec::new();
        write_sentence(&mut out, &tokens, &columns).unwrap();

        let sentences = read_table(Cursor::new(out)).unwrap();
        assert_eq!(sentences[0].tokens, tokens);
        assert_eq!(sentences[0].columns, columns);
    }

    #[test]
    fn test_read_token_with_space_and_long_token() {
        let tokens = ["New York", "Pinternationalization"];
        let columns = vec![vec!["*", "*"], vec!["(ARGM-LOC*)", "(ARGM-ADV-LONG*"]];

        let mut out = Vec::new();
        write_sentence(&mut out, &tokens, &columns).unwrap();

        let sentences = read_table(Cursor::new(out)).unwrap();
        assert_eq!(sentences[0].tokens, tokens);
        assert_eq!(sentences[0].columns, columns);
    }

    #[test]
    fn test_read_rejects_malformed_row() {
        let table = format!("{:<15}{:>15}\n{:<15}{:>15}\n", "a", "*", "b", "x  y");
        let err = read_table(Cursor::new(table)).unwrap_err();
        assert!(matches!(err, EvalError::MalformedRow(row) if row.contains("x  y")));
    }
}

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Output normalization and scoring.

use similar::{ChangeTag, TextDiff};

/// Canonicalizes program output for comparison: every `\r\n` and lone `\r`
/// becomes `\n`, then surrounding whitespace is trimmed.
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim()
        .to_string()
}

/// Formats a line diff between expected and actual output.
pub fn format_diff(expected: &str, actual: &str) -> String {
    let diff = TextDiff::from_lines(expected, actual);
    let mut output = String::new();

    for change in diff.iter_all_changes() {
        let prefix = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        output.push_str(&format!("{prefix} {change}"));
        if change.missing_newline() {
            output.push('\n');
        }
    }

    output
}

/// Outcome of comparing one program's output with the expected output.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Whether the output is accepted.
    pub matched: bool,
    /// Points awarded, between zero and the weight.
    pub score:   f64,
}

/// Turns expected and actual output into a score.
pub trait ScoringStrategy: Send + Sync {
    /// Scores `actual` against `expected`, out of `weight`.
    fn score(&self, expected: &str, actual: &str, weight: f64) -> Verdict;
}

/// All or nothing: full weight when the normalized outputs are equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl ScoringStrategy for ExactMatch {
    fn score(&self, expected: &str, actual: &str, weight: f64) -> Verdict {
        let matched = normalize(expected) == normalize(actual);
        Verdict {
            matched,
            score: if matched { weight } else { 0.0 },
        }
    }
}

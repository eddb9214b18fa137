#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt::Display;

use bon::Builder;
use serde::{Deserialize, Serialize};

/// Why a single submission did not produce a comparable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The archive was corrupt or contained an unsafe entry.
    ExtractionError,
    /// No file with a supported extension was found in the submission.
    NoMainFileFound,
    /// The compiler rejected the entry file.
    CompileError,
    /// The program exited unsuccessfully or could not be started.
    RuntimeError,
    /// A compile or run step exceeded its deadline.
    Timeout,
    /// No toolchain adapter is registered for the entry file's extension.
    UnsupportedLanguage,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::ExtractionError => "extraction error",
            FailureKind::NoMainFileFound => "no main file found",
            FailureKind::CompileError => "compile error",
            FailureKind::RuntimeError => "runtime error",
            FailureKind::Timeout => "timeout",
            FailureKind::UnsupportedLanguage => "unsupported language",
        };
        write!(f, "{label}")
    }
}

/// An assignment record as read from the assignment store.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct Assignment {
    /// Primary key.
    pub assignment_no:   u32,
    /// Human readable name, also the directory submissions live under.
    pub name:            String,
    /// Output a correct submission prints.
    pub expected_output: String,
    /// Whitespace separated command line arguments.
    #[builder(default)]
    #[serde(default)]
    pub args:            String,
    /// Points awarded on an exact match.
    #[builder(default = 100.0)]
    #[serde(default = "default_weight")]
    pub weight:          f64,
}

/// Serde default for [`Assignment::weight`].
fn default_weight() -> f64 {
    100.0
}

impl Assignment {
    /// Splits the argument string into the list handed to the program.
    pub fn arg_list(&self) -> Vec<String> {
        split_args(&self.args)
    }
}

/// Tokenizes a single argument string on whitespace.
pub fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

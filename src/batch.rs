#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Ad-hoc grading of a set of uploaded archives against one expected output.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Result, bail};
use futures::{StreamExt, stream};
use serde::Serialize;
use tabled::Tabled;

use crate::{
    archive::{ArchiveExtractor, ExtractionOutcome},
    compare::{ExactMatch, ScoringStrategy, normalize},
    config::Settings,
    dispatch::{ExecutionDispatcher, ExecutionRequest},
    identity,
    locate::find_entry_file,
    types::{FailureKind, split_args},
    util::scratch_dir,
};

/// Per-student verdict of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Output matched.
    Success,
    /// Program ran but printed something else.
    Failure,
    /// Extraction, entry-file search, or execution failed.
    Error,
}

impl Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BatchStatus::Success => "success",
            BatchStatus::Failure => "failure",
            BatchStatus::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// What happened to one archive.
#[derive(Tabled, Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionStatus {
    #[tabled(rename = "Archive")]
    /// File name of the uploaded archive.
    pub archive_name: String,
    #[tabled(rename = "Student")]
    /// Student the archive was attributed to.
    pub student_id:   String,
    #[tabled(rename = "Status")]
    /// Verdict.
    pub status:       BatchStatus,
    #[tabled(rename = "Message")]
    /// Short explanation.
    pub message:      String,
    #[tabled(skip)]
    /// Why an `error` status never reached comparison.
    pub failure_kind: Option<FailureKind>,
    #[tabled(skip)]
    /// Program output or diagnostics, when there are any.
    pub output:       Option<String>,
}

impl SubmissionStatus {
    /// An `error` status without output.
    fn error(
        extraction: &ExtractionOutcome,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            archive_name: extraction.archive_name.clone(),
            student_id:   extraction.student_id.clone(),
            status:       BatchStatus::Error,
            message:      message.into(),
            failure_kind: Some(kind),
            output:       None,
        }
    }
}

/// Extracts, runs, and compares a set of archives for one assignment.
///
/// Every archive is processed independently; one bad submission never stops
/// the others.
#[derive(Clone)]
pub struct BatchSubmissionProcessor {
    /// Compiles and runs entry files.
    dispatcher:   ExecutionDispatcher,
    /// Unpacks archives.
    extractor:    ArchiveExtractor,
    /// Decides whether output matches.
    scoring:      Arc<dyn ScoringStrategy>,
    /// Maximum archives processed at once.
    workers:      usize,
    /// Parent for the throwaway extraction directory.
    scratch_root: PathBuf,
}

impl BatchSubmissionProcessor {
    /// Creates a processor.
    pub fn new(dispatcher: ExecutionDispatcher, settings: &Settings) -> Self {
        Self {
            dispatcher,
            extractor: ArchiveExtractor::default(),
            scoring: Arc::new(ExactMatch),
            workers: settings.workers().max(1),
            scratch_root: settings.scratch_dir().to_path_buf(),
        }
    }

    /// Runs a reference solution and returns its normalized output, for use
    /// as the expected output of a batch.
    pub async fn reference_output(&self, solution: &Path, args: &str) -> Result<String> {
        let request = ExecutionRequest::builder()
            .source_path(solution)
            .args(split_args(args))
            .build();
        let outcome = self.dispatcher.dispatch(&request).await;
        if !outcome.succeeded {
            bail!(
                "Failed to run reference solution {}: {}",
                solution.display(),
                outcome.stderr
            );
        }
        Ok(normalize(&outcome.stdout))
    }

    /// Processes every archive and returns one status per archive, keyed by
    /// archive file name.
    ///
    /// With `destination` set, extracted trees are kept there; otherwise they
    /// live in a scratch directory removed before this returns. When several
    /// archives resolve to the same student, the first in name order is graded
    /// and the rest are reported as errors without being extracted.
    pub async fn process(
        &self,
        archives: &[PathBuf],
        expected_output: &str,
        args: &str,
        destination: Option<&Path>,
    ) -> Result<BTreeMap<String, SubmissionStatus>> {
        let scratch;
        let destination = match destination {
            Some(dir) => dir.to_path_buf(),
            None => {
                scratch = scratch_dir(&self.scratch_root)?;
                scratch.path().to_path_buf()
            }
        };

        let args = split_args(args);
        let destination = destination.as_path();
        let args = args.as_slice();

        let mut archives = archives.to_vec();
        archives.sort();
        tracing::info!("Processing {} archives", archives.len());

        // Extraction runs in order so duplicate ids resolve deterministically.
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut statuses = Vec::new();
        let mut extracted = Vec::with_capacity(archives.len());
        for archive in &archives {
            let archive_name = archive
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| archive.display().to_string());
            let student_id = identity::resolve(&archive_name);
            if let Some(owner) = owners.get(&student_id) {
                tracing::warn!(
                    "{archive_name} resolves to student {student_id}, already taken by {owner}"
                );
                statuses.push(SubmissionStatus {
                    archive_name,
                    message: format!(
                        "Duplicate submission for student {student_id} (see {owner})"
                    ),
                    student_id,
                    status: BatchStatus::Error,
                    failure_kind: Some(FailureKind::ExtractionError),
                    output: None,
                });
                continue;
            }
            owners.insert(student_id, archive_name);
            extracted.push(self.extractor.extract(archive, destination));
        }

        let graded: Vec<SubmissionStatus> = stream::iter(extracted)
            .map(|outcome| async move { self.grade(outcome, expected_output, args).await })
            .buffer_unordered(self.workers)
            .collect()
            .await;
        statuses.extend(graded);

        Ok(statuses
            .into_iter()
            .map(|s| (s.archive_name.clone(), s))
            .collect())
    }

    /// Grades one extracted archive.
    async fn grade(
        &self,
        extraction: ExtractionOutcome,
        expected_output: &str,
        args: &[String],
    ) -> SubmissionStatus {
        if !extraction.success {
            tracing::warn!("Failed to extract {}", extraction.archive_name);
            let mut status = SubmissionStatus::error(
                &extraction,
                FailureKind::ExtractionError,
                "Failed to extract ZIP file",
            );
            status.output = extraction.error.clone();
            return status;
        }

        let extensions = self.dispatcher.registry().extensions();
        let Some(entry) = find_entry_file(&extraction.extracted_root, &extensions) else {
            return SubmissionStatus::error(
                &extraction,
                FailureKind::NoMainFileFound,
                "No main file found in submission",
            );
        };

        let request = ExecutionRequest::builder()
            .source_path(entry)
            .args(args.to_vec())
            .build();
        let outcome = self.dispatcher.dispatch(&request).await;
        if !outcome.succeeded {
            let kind = outcome.failure_kind.unwrap_or(FailureKind::RuntimeError);
            let mut status =
                SubmissionStatus::error(&extraction, kind, format!("Code execution failed ({kind})"));
            status.output = Some(outcome.stderr);
            return status;
        }

        let actual = normalize(&outcome.stdout);
        let verdict = self.scoring.score(expected_output, &actual, 1.0);
        let (status, message) = if verdict.matched {
            (BatchStatus::Success, "Output matches expected result")
        } else {
            (BatchStatus::Failure, "Output does not match expected result")
        };
        SubmissionStatus {
            archive_name: extraction.archive_name,
            student_id: extraction.student_id,
            status,
            message: message.to_string(),
            failure_kind: None,
            output: Some(actual),
        }
    }
}

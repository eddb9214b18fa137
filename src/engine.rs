#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Evaluates extracted submissions against assignment records and records
//! the scores.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{StreamExt, stream};
use serde::Serialize;

use crate::{
    compare::{ExactMatch, ScoringStrategy, format_diff, normalize},
    config::Settings,
    dispatch::{ExecutionDispatcher, ExecutionRequest},
    error::EngineError,
    identity::{self, IdentityMapping, MAPPING_FILE_NAME},
    locate::find_entry_file,
    store::{AssignmentStore, ScoreStore},
    types::{Assignment, FailureKind},
    util::is_hidden_name,
};

/// Directory under an assignment folder that holds one directory per student.
pub const SUBMISSIONS_DIR: &str = "student_submissions";

/// Outcome of evaluating one student's submission for one assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    /// Student the submission belongs to.
    pub student_id:      String,
    /// Assignment evaluated.
    pub assignment_no:   u32,
    /// Assignment name.
    pub assignment_name: String,
    /// Awarded score.
    pub score:           f64,
    /// Whether the normalized output matched.
    pub matched:         bool,
    /// Normalized program output.
    pub student_output:  String,
    /// Normalized expected output.
    pub expected_output: String,
    /// Why the submission scored zero, if it failed before comparison.
    pub failure_kind:    Option<FailureKind>,
    /// Human readable explanation of the score.
    pub message:         String,
}

impl EvaluationResult {
    /// A zero-score result for a submission that never reached comparison.
    fn failed(
        assignment: &Assignment,
        student_id: String,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            student_id,
            assignment_no: assignment.assignment_no,
            assignment_name: assignment.name.clone(),
            score: 0.0,
            matched: false,
            student_output: String::new(),
            expected_output: normalize(&assignment.expected_output),
            failure_kind: Some(kind),
            message: message.into(),
        }
    }
}

/// Drives locate, dispatch, and comparison for every submission of an
/// assignment on a bounded worker pool.
#[derive(Clone)]
pub struct EvaluationEngine {
    /// Assignment records.
    assignments: Arc<dyn AssignmentStore>,
    /// Where every result's score is written.
    scores:      Arc<dyn ScoreStore>,
    /// Compiles and runs entry files.
    dispatcher:  ExecutionDispatcher,
    /// Turns outputs into scores.
    scoring:     Arc<dyn ScoringStrategy>,
    /// Maximum submissions evaluated at once.
    workers:     usize,
}

impl EvaluationEngine {
    /// Creates an engine scoring by exact match.
    pub fn new(
        assignments: Arc<dyn AssignmentStore>,
        scores: Arc<dyn ScoreStore>,
        dispatcher: ExecutionDispatcher,
        settings: &Settings,
    ) -> Self {
        Self {
            assignments,
            scores,
            dispatcher,
            scoring: Arc::new(ExactMatch),
            workers: settings.workers().max(1),
        }
    }

    /// Replaces the scoring strategy.
    pub fn with_scoring(mut self, scoring: Arc<dyn ScoringStrategy>) -> Self {
        self.scoring = scoring;
        self
    }

    /// Looks up an assignment, failing the request if it does not exist.
    fn assignment(&self, assignment_no: u32) -> Result<Assignment, EngineError> {
        self.assignments
            .get(assignment_no)?
            .ok_or(EngineError::AssignmentNotFound(assignment_no))
    }

    /// Evaluates a single student's submission tree.
    ///
    /// The student id is derived from the directory name, through the
    /// mapping file of the enclosing assignment folder when there is one.
    pub async fn evaluate_one(
        &self,
        assignment_no: u32,
        student_root: &Path,
    ) -> Result<EvaluationResult, EngineError> {
        let assignment = self.assignment(assignment_no)?;
        let dir_name = student_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mapping = student_root
            .parent()
            .and_then(Path::parent)
            .map(load_mapping)
            .unwrap_or_default();
        let student_id = identity::resolve_directory(&dir_name, &mapping);

        let result = self
            .evaluate_submission(&assignment, student_id, student_root)
            .await;
        self.record(&result);
        Ok(result)
    }

    /// Evaluates every student directory of one assignment under
    /// `submissions_root/<assignment name>/student_submissions/`.
    pub async fn evaluate_assignment(
        &self,
        assignment_no: u32,
        submissions_root: &Path,
    ) -> Result<Vec<EvaluationResult>, EngineError> {
        let assignment = self.assignment(assignment_no)?;
        Ok(self.evaluate_students(&assignment, submissions_root).await)
    }

    /// Evaluates every assignment in the store, in assignment-number order.
    pub async fn evaluate_all(
        &self,
        submissions_root: &Path,
    ) -> Result<Vec<EvaluationResult>, EngineError> {
        let mut assignments = self.assignments.all()?;
        assignments.sort_by_key(|a| a.assignment_no);

        let mut results = Vec::new();
        for assignment in &assignments {
            results.extend(self.evaluate_students(assignment, submissions_root).await);
        }
        Ok(results)
    }

    /// Evaluates all student directories of `assignment`, sorted by student.
    async fn evaluate_students(
        &self,
        assignment: &Assignment,
        submissions_root: &Path,
    ) -> Vec<EvaluationResult> {
        let assignment_dir = submissions_root.join(&assignment.name);
        let students_dir = assignment_dir.join(SUBMISSIONS_DIR);
        if !students_dir.is_dir() {
            tracing::warn!(
                "No submissions for assignment {} at {}",
                assignment.assignment_no,
                students_dir.display()
            );
            return Vec::new();
        }

        let mapping = load_mapping(&assignment_dir);

        let students = match student_dirs(&students_dir) {
            Ok(students) => students,
            Err(e) => {
                tracing::error!("Could not list {}: {e}", students_dir.display());
                return Vec::new();
            }
        };
        tracing::info!(
            "Evaluating {} submissions for assignment {} ({})",
            students.len(),
            assignment.assignment_no,
            assignment.name
        );

        let mapping = &mapping;
        let mut results: Vec<EvaluationResult> = stream::iter(students)
            .map(|(dir_name, root)| async move {
                let student_id = identity::resolve_directory(&dir_name, mapping);
                let result = self.evaluate_submission(assignment, student_id, &root).await;
                self.record(&result);
                result
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        results.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        results
    }

    /// Locates, runs, and scores one submission. Never fails: problems are
    /// folded into the result.
    pub async fn evaluate_submission(
        &self,
        assignment: &Assignment,
        student_id: String,
        root: &Path,
    ) -> EvaluationResult {
        let extensions = self.dispatcher.registry().extensions();
        let Some(entry) = find_entry_file(root, &extensions) else {
            tracing::warn!("No main file found for student {student_id}");
            return EvaluationResult::failed(
                assignment,
                student_id,
                FailureKind::NoMainFileFound,
                format!("No main file found in {}", root.display()),
            );
        };

        let request = ExecutionRequest::builder()
            .source_path(entry.clone())
            .args(assignment.arg_list())
            .build();
        let outcome = self.dispatcher.dispatch(&request).await;

        if !outcome.succeeded {
            let kind = outcome.failure_kind.unwrap_or(FailureKind::RuntimeError);
            tracing::warn!(
                "Student {student_id}, assignment {}: {kind}",
                assignment.assignment_no
            );
            let mut result = EvaluationResult::failed(assignment, student_id, kind, outcome.stderr);
            result.student_output = normalize(&outcome.stdout);
            return result;
        }

        let expected = normalize(&assignment.expected_output);
        let actual = normalize(&outcome.stdout);
        let verdict = self
            .scoring
            .score(&expected, &actual, assignment.weight);
        let message = if verdict.matched {
            "Output matches expected result".to_string()
        } else {
            format!(
                "Output does not match expected result:\n{}",
                format_diff(&expected, &actual)
            )
        };
        tracing::info!(
            "Student {student_id}, assignment {}: {:.2}/{:.2}",
            assignment.assignment_no,
            verdict.score,
            assignment.weight
        );

        EvaluationResult {
            student_id,
            assignment_no: assignment.assignment_no,
            assignment_name: assignment.name.clone(),
            score: verdict.score,
            matched: verdict.matched,
            student_output: actual,
            expected_output: expected,
            failure_kind: None,
            message,
        }
    }

    /// Upserts a result's score; failures are logged and skipped.
    fn record(&self, result: &EvaluationResult) {
        if let Err(e) = self
            .scores
            .upsert(result.assignment_no, &result.student_id, result.score)
        {
            tracing::error!(
                "Could not record score for student {} on assignment {}: {e}",
                result.student_id,
                result.assignment_no
            );
        }
    }
}

/// Reads the identity mapping kept in an assignment folder; an unreadable
/// file is logged and treated as empty.
fn load_mapping(assignment_dir: &Path) -> IdentityMapping {
    let path = assignment_dir.join(MAPPING_FILE_NAME);
    IdentityMapping::load(&path).unwrap_or_else(|e| {
        tracing::warn!("Ignoring {}: {e:#}", path.display());
        IdentityMapping::default()
    })
}

/// Student directories directly under `dir`, sorted by name.
fn student_dirs(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut students = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_dir() && !is_hidden_name(&name) {
            students.push((name, entry.path()));
        }
    }
    students.sort();
    Ok(students)
}

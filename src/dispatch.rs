#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Compile-and-run dispatch for a single source file.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use bon::Builder;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::{
    config::{Settings, Timeouts},
    language::Language,
    toolchain::{
        AdapterRegistry, CompileOutcome, StepContext, ToolchainAdapter, ToolchainResolver,
        java_entry_class,
    },
    types::FailureKind,
    util::scratch_dir,
};

/// Makes `path` absolute against the current directory.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// One request to compile (if needed) and run a source file.
#[derive(Debug, Clone, Builder)]
pub struct ExecutionRequest {
    /// Source file to execute.
    #[builder(into)]
    pub source_path: PathBuf,
    /// Overrides extension based language detection.
    pub language:    Option<Language>,
    /// Command line arguments for the program.
    #[builder(default, with = |args: impl IntoIterator<Item = String>| args.into_iter().collect())]
    pub args:        Vec<String>,
    /// Text piped to the program's stdin.
    #[builder(into)]
    pub stdin:       Option<String>,
}

/// Result of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Captured, trimmed stdout.
    pub stdout:       String,
    /// Whether the program ran to a successful exit.
    pub succeeded:    bool,
    /// Classification of the failure, if any.
    pub failure_kind: Option<FailureKind>,
    /// Diagnostics: compiler output, stderr, or a description of the failure.
    pub stderr:       String,
}

impl ExecutionOutcome {
    /// A successful run with the given output.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout:       stdout.into(),
            succeeded:    true,
            failure_kind: None,
            stderr:       String::new(),
        }
    }

    /// A failed step with diagnostics.
    pub fn failure(kind: FailureKind, stderr: impl Into<String>) -> Self {
        Self {
            stdout:       String::new(),
            succeeded:    false,
            failure_kind: Some(kind),
            stderr:       stderr.into(),
        }
    }

    /// Attaches whatever stdout was produced before a failure.
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }
}

/// Selects a toolchain adapter for a source file and drives its compile and
/// run steps under deadlines.
///
/// Every dispatch gets a uniquely named scratch directory that is removed
/// when the dispatch ends, however it ends.
#[derive(Clone)]
pub struct ExecutionDispatcher {
    /// Extension to adapter mapping.
    registry:     Arc<AdapterRegistry>,
    /// Tool path resolution.
    tools:        ToolchainResolver,
    /// Per-step deadlines.
    timeouts:     Timeouts,
    /// Parent of the per-dispatch scratch directories.
    scratch_root: PathBuf,
}

impl ExecutionDispatcher {
    /// Creates a dispatcher.
    pub fn new(registry: AdapterRegistry, tools: ToolchainResolver, settings: &Settings) -> Self {
        Self {
            registry: Arc::new(registry),
            tools,
            timeouts: settings.timeouts(),
            scratch_root: absolute(settings.scratch_dir()),
        }
    }

    /// Returns the adapter registry.
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Finds the adapter for a source, honouring an explicit language.
    fn adapter_for(
        &self,
        source: &Path,
        language: Option<Language>,
    ) -> Option<Arc<dyn ToolchainAdapter>> {
        match language {
            Some(lang) => self.registry.for_language(lang),
            None => self.registry.for_path(source),
        }
    }

    /// Outcome for a file no adapter handles.
    fn unsupported(source: &Path) -> ExecutionOutcome {
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        ExecutionOutcome::failure(
            FailureKind::UnsupportedLanguage,
            format!("Unsupported file type: .{ext} ({})", source.display()),
        )
    }

    /// Compiles if the language needs it, then runs.
    ///
    /// Never fails: every problem is reported through the outcome.
    pub async fn dispatch(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let source = absolute(&request.source_path);
        let source = source.as_path();
        let Some(adapter) = self.adapter_for(source, request.language) else {
            return Self::unsupported(source);
        };

        let scratch = match scratch_dir(&self.scratch_root) {
            Ok(dir) => dir,
            Err(e) => return ExecutionOutcome::failure(FailureKind::RuntimeError, format!("{e:#}")),
        };
        let ctx = StepContext {
            tools:    &self.tools,
            timeouts: self.timeouts,
            scratch:  scratch.path(),
        };

        tracing::debug!("dispatching {} as {}", source.display(), adapter.language());
        let artifact = match adapter.compile(source, &ctx).await {
            Ok(CompileOutcome::Ready(artifact)) => artifact,
            Ok(CompileOutcome::Failed { diagnostics }) => {
                return ExecutionOutcome::failure(FailureKind::CompileError, diagnostics);
            }
            Ok(CompileOutcome::TimedOut(limit)) => {
                return ExecutionOutcome::failure(
                    FailureKind::Timeout,
                    format!("compile step exceeded {}s", limit.as_secs_f64()),
                );
            }
            Err(e) => {
                return ExecutionOutcome::failure(
                    FailureKind::CompileError,
                    format!("Could not compile {}: {e:#}", source.display()),
                );
            }
        };

        match adapter
            .run(&artifact, &request.args, request.stdin.as_deref(), &ctx)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::failure(
                FailureKind::RuntimeError,
                format!("Could not run {}: {e:#}", source.display()),
            ),
        }
    }

    /// Compiles without running. Interpreted languages succeed immediately.
    pub async fn check(&self, source: &Path, language: Option<Language>) -> ExecutionOutcome {
        let source = absolute(source);
        let source = source.as_path();
        let Some(adapter) = self.adapter_for(source, language) else {
            return Self::unsupported(source);
        };
        if !adapter.compiles() {
            return ExecutionOutcome::success(format!(
                "No compilation needed for {}",
                adapter.language()
            ));
        }

        let scratch = match scratch_dir(&self.scratch_root) {
            Ok(dir) => dir,
            Err(e) => return ExecutionOutcome::failure(FailureKind::RuntimeError, format!("{e:#}")),
        };
        let ctx = StepContext {
            tools:    &self.tools,
            timeouts: self.timeouts,
            scratch:  scratch.path(),
        };

        match adapter.compile(source, &ctx).await {
            Ok(CompileOutcome::Ready(_)) => ExecutionOutcome::success("Compilation successful"),
            Ok(CompileOutcome::Failed { diagnostics }) => {
                ExecutionOutcome::failure(FailureKind::CompileError, diagnostics)
            }
            Ok(CompileOutcome::TimedOut(limit)) => ExecutionOutcome::failure(
                FailureKind::Timeout,
                format!("compile step exceeded {}s", limit.as_secs_f64()),
            ),
            Err(e) => ExecutionOutcome::failure(FailureKind::CompileError, format!("{e:#}")),
        }
    }

    /// Writes `code` into a fresh scratch directory and dispatches it.
    pub async fn execute_source(
        &self,
        code: &str,
        language: Language,
        args: &[String],
        stdin: Option<&str>,
    ) -> ExecutionOutcome {
        let (_dir, source) = match self.write_source(code, language) {
            Ok(written) => written,
            Err(e) => return ExecutionOutcome::failure(FailureKind::RuntimeError, format!("{e:#}")),
        };
        let request = ExecutionRequest::builder()
            .source_path(source)
            .language(language)
            .args(args.iter().cloned())
            .maybe_stdin(stdin)
            .build();
        self.dispatch(&request).await
    }

    /// Writes `code` into a fresh scratch directory and compiles it.
    pub async fn check_source(&self, code: &str, language: Language) -> ExecutionOutcome {
        let (_dir, source) = match self.write_source(code, language) {
            Ok(written) => written,
            Err(e) => return ExecutionOutcome::failure(FailureKind::RuntimeError, format!("{e:#}")),
        };
        self.check(&source, Some(language)).await
    }

    /// Materializes a code snippet as a file; the directory lives as long as
    /// the returned guard.
    fn write_source(&self, code: &str, language: Language) -> Result<(TempDir, PathBuf)> {
        let dir = scratch_dir(&self.scratch_root)?;
        let stem = match language {
            Language::Java => java_entry_class(code).unwrap_or_else(|| "Main".to_string()),
            _ => "main".to_string(),
        };
        let path = dir.path().join(format!("{stem}.{}", language.extension()));
        std::fs::write(&path, code)
            .with_context(|| format!("Could not write {}", path.display()))?;
        Ok((dir, path))
    }
}

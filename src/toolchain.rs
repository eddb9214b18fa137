#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Per-language toolchain adapters and the registry that maps file
//! extensions onto them.
//!
//! Adding a language means implementing [`ToolchainAdapter`] and registering
//! it; the dispatcher never matches on languages itself.

use std::{
    ffi::OsString,
    fmt::Display,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use which::which;

use crate::{
    config::Timeouts,
    dispatch::ExecutionOutcome,
    language::Language,
    process::{self, CommandSpec, Completion, StdinSource},
    store::ToolchainConfigStore,
    types::FailureKind,
};

/// An executable an adapter depends on, addressed by a stable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tool {
    /// Key used in the toolchain configuration store.
    pub key:     &'static str,
    /// Conventional binary name used when nothing is configured.
    pub default: &'static str,
}

impl Tool {
    /// C compiler.
    pub const GCC: Tool = Tool {
        key:     "c",
        default: "gcc",
    };
    /// C++ compiler.
    pub const GXX: Tool = Tool {
        key:     "cpp",
        default: "g++",
    };
    /// Java compiler.
    pub const JAVAC: Tool = Tool {
        key:     "java",
        default: "javac",
    };
    /// Java launcher.
    pub const JAVA: Tool = Tool {
        key:     "java-runtime",
        default: "java",
    };
    /// C# compiler.
    pub const MCS: Tool = Tool {
        key:     "csharp",
        default: "mcs",
    };
    /// Runtime for compiled C# assemblies.
    pub const MONO: Tool = Tool {
        key:     "csharp-runtime",
        default: "mono",
    };
    /// Python interpreter.
    pub const PYTHON: Tool = Tool {
        key:     "python",
        default: if cfg!(windows) { "python" } else { "python3" },
    };
    /// JavaScript runtime.
    pub const NODE: Tool = Tool {
        key:     "javascript",
        default: "node",
    };
    /// Go toolchain driver.
    pub const GO: Tool = Tool {
        key:     "go",
        default: "go",
    };

    /// Every tool used by the built-in adapters.
    pub const BUILT_IN: [Tool; 9] = [
        Tool::GCC,
        Tool::GXX,
        Tool::JAVAC,
        Tool::JAVA,
        Tool::MCS,
        Tool::MONO,
        Tool::PYTHON,
        Tool::NODE,
        Tool::GO,
    ];

    /// Environment variable consulted for this tool, e.g.
    /// `AUTOGRADER_TOOL_JAVA_RUNTIME`.
    pub fn env_var(&self) -> String {
        format!("AUTOGRADER_TOOL_{}", self.key.to_ascii_uppercase().replace('-', "_"))
    }
}

/// Which lookup tier produced a tool path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    /// An explicit override from the configuration store.
    Stored,
    /// An `AUTOGRADER_TOOL_*` environment variable.
    Environment,
    /// The conventional binary name.
    BuiltIn,
}

impl Display for ToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolSource::Stored => write!(f, "stored"),
            ToolSource::Environment => write!(f, "environment"),
            ToolSource::BuiltIn => write!(f, "built-in"),
        }
    }
}

/// A tool path together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    /// Executable to launch.
    pub program: OsString,
    /// Tier that supplied it.
    pub source:  ToolSource,
}

/// Resolves tool executables: stored override, then environment, then the
/// built-in default. Resolution never writes to the store.
#[derive(Clone, Default)]
pub struct ToolchainResolver {
    /// Optional explicit overrides.
    store: Option<Arc<dyn ToolchainConfigStore>>,
}

impl ToolchainResolver {
    /// Resolver backed by a configuration store.
    pub fn new(store: Arc<dyn ToolchainConfigStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Resolver with no stored overrides.
    pub fn without_store() -> Self {
        Self::default()
    }

    /// Resolves `tool` against the process environment.
    pub fn resolve(&self, tool: &Tool) -> ResolvedTool {
        self.resolve_with_env(tool, |name| std::env::var(name).ok())
    }

    /// Resolves `tool` using `env` for the environment tier.
    pub fn resolve_with_env(
        &self,
        tool: &Tool,
        env: impl Fn(&str) -> Option<String>,
    ) -> ResolvedTool {
        if let Some(store) = &self.store {
            match store.get(tool.key) {
                Ok(Some(path)) if !path.trim().is_empty() => {
                    return ResolvedTool {
                        program: path.trim().into(),
                        source:  ToolSource::Stored,
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Could not read toolchain override for `{}`: {e}", tool.key)
                }
            }
        }

        if let Some(path) = env(&tool.env_var()).filter(|p| !p.trim().is_empty()) {
            return ResolvedTool {
                program: path.trim().into(),
                source:  ToolSource::Environment,
            };
        }

        let program = which(tool.default)
            .map(PathBuf::into_os_string)
            .unwrap_or_else(|_| tool.default.into());
        ResolvedTool {
            program,
            source: ToolSource::BuiltIn,
        }
    }
}

/// Everything an adapter needs for one compile or run step.
pub struct StepContext<'a> {
    /// Tool resolution.
    pub tools:    &'a ToolchainResolver,
    /// Per-step deadlines.
    pub timeouts: Timeouts,
    /// Private scratch directory for this dispatch; removed by the caller.
    pub scratch:  &'a Path,
}

/// A runnable product of the compile step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Binary, assembly, class directory, or the source itself.
    pub path:    PathBuf,
    /// Working directory for the run step.
    pub workdir: PathBuf,
    /// Entry point name, for runtimes that need one (e.g. a Java class).
    pub entry:   Option<String>,
}

impl Artifact {
    /// An artifact that is the source file itself, run from its directory.
    pub fn source(source: &Path) -> Self {
        Self {
            path:    source.to_path_buf(),
            workdir: parent_dir(source),
            entry:   None,
        }
    }
}

/// Result of a compile step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Compilation succeeded (or was not needed).
    Ready(Artifact),
    /// The compiler rejected the source.
    Failed {
        /// Raw compiler diagnostics.
        diagnostics: String,
    },
    /// The compiler did not finish before the deadline.
    TimedOut(Duration),
}

/// Language specific compile and run capability.
#[async_trait]
pub trait ToolchainAdapter: Send + Sync {
    /// Language handled by this adapter.
    fn language(&self) -> Language;

    /// Canonical extension of source files handled here, without the dot.
    fn file_extension(&self) -> &'static str {
        self.language().extension()
    }

    /// Every extension this adapter should be registered under.
    fn extensions(&self) -> &'static [&'static str] {
        self.language().extensions()
    }

    /// Whether [`ToolchainAdapter::compile`] does real work.
    fn compiles(&self) -> bool {
        false
    }

    /// Builds `source` into an artifact inside `ctx.scratch`.
    ///
    /// Interpreted adapters keep the default, which hands back the source.
    async fn compile(&self, source: &Path, _ctx: &StepContext<'_>) -> Result<CompileOutcome> {
        Ok(CompileOutcome::Ready(Artifact::source(source)))
    }

    /// Runs an artifact with arguments and optional stdin.
    async fn run(
        &self,
        artifact: &Artifact,
        args: &[String],
        stdin: Option<&str>,
        ctx: &StepContext<'_>,
    ) -> Result<ExecutionOutcome>;
}

/// Directory containing `path`, or `.` for bare file names.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// File stem of `path` as an owned string.
fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "main".to_string())
}

/// Runs a compiler command and classifies its result.
async fn compile_step(
    cmd: CommandSpec,
    artifact: Artifact,
    cwd: &Path,
    deadline: Duration,
) -> Result<CompileOutcome> {
    tracing::debug!("compile: {}", cmd.display());
    let completion =
        process::run_collect(&cmd.program, &cmd.args, StdinSource::Null, Some(cwd), &[], Some(deadline))
            .await?;

    Ok(match completion {
        Completion::Finished(collected) if collected.status.success() => {
            CompileOutcome::Ready(artifact)
        }
        Completion::Finished(collected) => {
            let mut diagnostics = collected.stderr_text();
            if diagnostics.trim().is_empty() {
                diagnostics = collected.stdout_text();
            }
            CompileOutcome::Failed { diagnostics }
        }
        Completion::TimedOut(limit) => CompileOutcome::TimedOut(limit),
    })
}

/// Runs a program command and classifies its result.
async fn run_step(
    cmd: CommandSpec,
    stdin: Option<&str>,
    cwd: &Path,
    deadline: Duration,
) -> Result<ExecutionOutcome> {
    tracing::debug!("run: {}", cmd.display());
    let completion = process::run_collect(
        &cmd.program,
        &cmd.args,
        StdinSource::from(stdin),
        Some(cwd),
        &[],
        Some(deadline),
    )
    .await?;

    Ok(match completion {
        Completion::Finished(collected) if collected.status.success() => {
            ExecutionOutcome::success(collected.stdout_text().trim())
        }
        Completion::Finished(collected) => {
            let code = collected
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let mut stderr = collected.stderr_text();
            if stderr.trim().is_empty() {
                stderr = format!("process exited with status {code}");
            }
            ExecutionOutcome::failure(FailureKind::RuntimeError, stderr)
                .with_stdout(collected.stdout_text().trim())
        }
        Completion::TimedOut(limit) => ExecutionOutcome::failure(
            FailureKind::Timeout,
            format!("run step exceeded {}s", limit.as_secs_f64()),
        ),
    })
}

/// How a compiler is told where to write its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFlag {
    /// `-o <path>` (gcc, g++).
    Dash,
    /// `-out:<path>` (mcs, csc).
    Colon,
}

/// Compiled-then-run adapter: native compilers, or managed compilers whose
/// output is launched through a runtime.
#[derive(Debug, Clone)]
pub struct CompiledAdapter {
    /// Language handled.
    language:    Language,
    /// Compiler tool.
    compiler:    Tool,
    /// Output flag style of the compiler.
    output_flag: OutputFlag,
    /// Runtime that launches the artifact; `None` runs it directly.
    launcher:    Option<Tool>,
    /// Suffix appended to the artifact name.
    suffix:      &'static str,
}

impl CompiledAdapter {
    /// C via `gcc <src> -o <out>`.
    pub fn c() -> Self {
        Self {
            language:    Language::C,
            compiler:    Tool::GCC,
            output_flag: OutputFlag::Dash,
            launcher:    None,
            suffix:      std::env::consts::EXE_SUFFIX,
        }
    }

    /// C++ via `g++ <src> -o <out>`.
    pub fn cpp() -> Self {
        Self {
            language: Language::Cpp,
            compiler: Tool::GXX,
            ..Self::c()
        }
    }

    /// C# via `mcs <src> -out:<out>.exe`, launched with `mono`.
    pub fn csharp() -> Self {
        Self {
            language:    Language::CSharp,
            compiler:    Tool::MCS,
            output_flag: OutputFlag::Colon,
            launcher:    Some(Tool::MONO),
            suffix:      ".exe",
        }
    }
}

#[async_trait]
impl ToolchainAdapter for CompiledAdapter {
    fn language(&self) -> Language {
        self.language
    }

    fn compiles(&self) -> bool {
        true
    }

    async fn compile(&self, source: &Path, ctx: &StepContext<'_>) -> Result<CompileOutcome> {
        let output = ctx.scratch.join(format!("{}{}", stem(source), self.suffix));
        let compiler = ctx.tools.resolve(&self.compiler);
        let cmd = match self.output_flag {
            OutputFlag::Dash => CommandSpec::new(compiler.program)
                .arg(source)
                .arg("-o")
                .arg(&output),
            OutputFlag::Colon => {
                let mut out_arg = OsString::from("-out:");
                out_arg.push(output.as_os_str());
                CommandSpec::new(compiler.program).arg(out_arg).arg(source)
            }
        };

        let artifact = Artifact {
            path:    output,
            workdir: parent_dir(source),
            entry:   None,
        };
        compile_step(cmd, artifact, &parent_dir(source), ctx.timeouts.compile).await
    }

    async fn run(
        &self,
        artifact: &Artifact,
        args: &[String],
        stdin: Option<&str>,
        ctx: &StepContext<'_>,
    ) -> Result<ExecutionOutcome> {
        let cmd = match &self.launcher {
            Some(launcher) => CommandSpec::new(ctx.tools.resolve(launcher).program).arg(&artifact.path),
            None => CommandSpec::new(&artifact.path),
        }
        .args(args);
        run_step(cmd, stdin, &artifact.workdir, ctx.timeouts.run).await
    }
}

/// Java sources: `javac -d <scratch>`, then `java -cp <scratch> <Class>` run
/// from the class directory.
#[derive(Debug, Clone, Default)]
pub struct JvmAdapter;

/// `public` class declarations.
static PUBLIC_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*public\s+(?:(?:final|abstract|static)\s+)*class\s+([A-Za-z_$][\w$]*)")
        .expect("public class pattern is valid")
});

/// Any class declaration.
static ANY_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:(?:final|abstract|static)\s+)*class\s+([A-Za-z_$][\w$]*)")
        .expect("class pattern is valid")
});

/// Picks the class to launch: first `public class`, then first `class`.
pub fn java_entry_class(code: &str) -> Option<String> {
    PUBLIC_CLASS
        .captures(code)
        .or_else(|| ANY_CLASS.captures(code))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[async_trait]
impl ToolchainAdapter for JvmAdapter {
    fn language(&self) -> Language {
        Language::Java
    }

    fn compiles(&self) -> bool {
        true
    }

    async fn compile(&self, source: &Path, ctx: &StepContext<'_>) -> Result<CompileOutcome> {
        let code = tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Could not read {}", source.display()))?;
        let entry = java_entry_class(&code).unwrap_or_else(|| stem(source));

        let cmd = CommandSpec::new(ctx.tools.resolve(&Tool::JAVAC).program)
            .args(["-encoding", "UTF-8", "-d"])
            .arg(ctx.scratch)
            .arg(source);
        let artifact = Artifact {
            path:    ctx.scratch.to_path_buf(),
            workdir: ctx.scratch.to_path_buf(),
            entry:   Some(entry),
        };
        compile_step(cmd, artifact, &parent_dir(source), ctx.timeouts.compile).await
    }

    async fn run(
        &self,
        artifact: &Artifact,
        args: &[String],
        stdin: Option<&str>,
        ctx: &StepContext<'_>,
    ) -> Result<ExecutionOutcome> {
        let class = artifact.entry.clone().unwrap_or_else(|| "Main".to_string());
        let cmd = CommandSpec::new(ctx.tools.resolve(&Tool::JAVA).program)
            .arg("-cp")
            .arg(&artifact.path)
            .arg(class)
            .args(args);
        // The child gets its own working directory; ours never changes, so
        // there is nothing to restore on any exit path.
        run_step(cmd, stdin, &artifact.workdir, ctx.timeouts.run).await
    }
}

/// Directly interpreted sources: `<interpreter> <source> <args...>`.
#[derive(Debug, Clone)]
pub struct InterpretedAdapter {
    /// Language handled.
    language:    Language,
    /// Interpreter tool.
    interpreter: Tool,
}

impl InterpretedAdapter {
    /// Python via `python3`.
    pub fn python() -> Self {
        Self {
            language:    Language::Python,
            interpreter: Tool::PYTHON,
        }
    }

    /// JavaScript via `node`.
    pub fn javascript() -> Self {
        Self {
            language:    Language::JavaScript,
            interpreter: Tool::NODE,
        }
    }
}

#[async_trait]
impl ToolchainAdapter for InterpretedAdapter {
    fn language(&self) -> Language {
        self.language
    }

    async fn run(
        &self,
        artifact: &Artifact,
        args: &[String],
        stdin: Option<&str>,
        ctx: &StepContext<'_>,
    ) -> Result<ExecutionOutcome> {
        let cmd = CommandSpec::new(ctx.tools.resolve(&self.interpreter).program)
            .arg(&artifact.path)
            .args(args);
        run_step(cmd, stdin, &artifact.workdir, ctx.timeouts.run).await
    }
}

/// Sources built and run by a single driver command, e.g. `go run`.
///
/// The single step is bounded by the compile and run deadlines combined.
#[derive(Debug, Clone)]
pub struct OneStepAdapter {
    /// Language handled.
    language:   Language,
    /// Driver tool.
    driver:     Tool,
    /// Driver subcommand placed before the source.
    subcommand: &'static str,
}

impl OneStepAdapter {
    /// Go via `go run`.
    pub fn go() -> Self {
        Self {
            language:   Language::Go,
            driver:     Tool::GO,
            subcommand: "run",
        }
    }
}

#[async_trait]
impl ToolchainAdapter for OneStepAdapter {
    fn language(&self) -> Language {
        self.language
    }

    async fn run(
        &self,
        artifact: &Artifact,
        args: &[String],
        stdin: Option<&str>,
        ctx: &StepContext<'_>,
    ) -> Result<ExecutionOutcome> {
        let cmd = CommandSpec::new(ctx.tools.resolve(&self.driver).program)
            .arg(self.subcommand)
            .arg(&artifact.path)
            .args(args);
        let deadline = ctx.timeouts.compile + ctx.timeouts.run;
        run_step(cmd, stdin, &artifact.workdir, deadline).await
    }
}

/// Extension-keyed adapter registry. Registration order is also the order
/// in which extensions are tried when searching for an entry file.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    /// `(extension, adapter)` pairs in registration order.
    entries: Vec<(&'static str, Arc<dyn ToolchainAdapter>)>,
}

impl AdapterRegistry {
    /// A registry with no adapters.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with the built-in adapters for every [`Language`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry
            .register(Arc::new(InterpretedAdapter::python()))
            .register(Arc::new(JvmAdapter))
            .register(Arc::new(CompiledAdapter::c()))
            .register(Arc::new(CompiledAdapter::cpp()))
            .register(Arc::new(CompiledAdapter::csharp()))
            .register(Arc::new(InterpretedAdapter::javascript()))
            .register(Arc::new(OneStepAdapter::go()));
        registry
    }

    /// Registers `adapter` under each of its extensions, replacing any
    /// adapter previously registered for them.
    pub fn register(&mut self, adapter: Arc<dyn ToolchainAdapter>) -> &mut Self {
        for ext in adapter.extensions() {
            match self.entries.iter_mut().find(|(e, _)| e == ext) {
                Some(slot) => slot.1 = Arc::clone(&adapter),
                None => self.entries.push((ext, Arc::clone(&adapter))),
            }
        }
        self
    }

    /// Adapter for an extension, ignoring case and a leading dot.
    pub fn for_extension(&self, ext: &str) -> Option<Arc<dyn ToolchainAdapter>> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, a)| Arc::clone(a))
    }

    /// Adapter for a file, by its extension.
    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn ToolchainAdapter>> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.for_extension(e))
    }

    /// Adapter registered for a language's canonical extension.
    pub fn for_language(&self, language: Language) -> Option<Arc<dyn ToolchainAdapter>> {
        self.for_extension(language.extension())
    }

    /// Registered extensions in registration order.
    pub fn extensions(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(e, _)| *e).collect()
    }
}

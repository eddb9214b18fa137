#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # autograder
//!
//! Command line front end: extract submission archives, run single files,
//! grade submissions against assignment records, and manage toolchain
//! overrides.
//!
//! Assignments, scores, and toolchain overrides are JSON files under
//! `AUTOGRADER_DATA_DIR` (default `.autograder/`).

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use autograder::{
    archive::{self, ArchiveExtractor, ExistingPolicy},
    batch::BatchSubmissionProcessor,
    config::Settings,
    default_dispatcher,
    dispatch::{ExecutionOutcome, ExecutionRequest},
    engine::{EvaluationEngine, EvaluationResult},
    identity::{self, MAPPING_FILE_NAME},
    language::Language,
    store::{JsonAssignmentStore, JsonScoreStore, JsonToolchainStore, ToolchainConfigStore},
    toolchain::{Tool, ToolchainResolver},
};
use bpaf::*;
use dotenvy::dotenv;
use tabled::{
    Table, Tabled,
    settings::{Modify, Panel, Style, Width, object::Rows},
};
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// Where the expected output of a batch comes from.
#[derive(Debug, Clone)]
enum Expected {
    /// Given literally.
    Text(String),
    /// Printed by a reference solution.
    Reference(PathBuf),
}

/// Toolchain override subcommands.
#[derive(Debug, Clone)]
enum ToolchainCmd {
    /// Show how a tool resolves
    Get(String),
    /// Store an override
    Set(String, String),
    /// Show every tool
    List,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Extract every archive in a directory
    Extract {
        /// Directory holding `*.zip` files.
        source:        PathBuf,
        /// Directory receiving one folder per student.
        destination:   PathBuf,
        /// Keep existing student folders.
        skip_existing: bool,
        /// Where to write the identity mapping file.
        mapping:       Option<PathBuf>,
    },
    /// Resolve student ids from names
    Resolve(Vec<String>),
    /// Compile and run one file
    Run {
        /// Source file.
        file:  PathBuf,
        /// Language override.
        lang:  Option<Language>,
        /// Text piped to stdin.
        stdin: Option<String>,
        /// Program arguments.
        args:  Vec<String>,
    },
    /// Compile one file without running it
    Check(Option<Language>, PathBuf),
    /// Grade one student directory
    Grade(u32, PathBuf),
    /// Grade every submission under a root
    GradeAll(PathBuf, Option<u32>),
    /// Grade a set of archives against one expected output
    Batch {
        /// Expected output source.
        expected: Expected,
        /// Argument string for every program.
        args:     String,
        /// Keep extracted trees here.
        keep:     Option<PathBuf>,
        /// Archives to grade.
        archives: Vec<PathBuf>,
    },
    /// Toolchain override management
    Toolchain(ToolchainCmd),
}

/// Parsed command line.
#[derive(Debug, Clone)]
struct Opts {
    /// Log at DEBUG instead of INFO.
    verbose: bool,
    /// Print JSON instead of tables.
    json:    bool,
    /// Subcommand.
    cmd:     Cmd,
}

/// Parse the command line arguments
fn options() -> Opts {
    parser().run()
}

/// The command line parser
fn parser() -> OptionParser<Opts> {
    /// parses an optional language override
    fn lang() -> impl Parser<Option<Language>> {
        short('l')
            .long("lang")
            .help("Language to use instead of detecting it from the extension")
            .argument::<Language>("LANG")
            .optional()
    }

    /// parses a source file name
    fn file() -> impl Parser<PathBuf> {
        positional::<PathBuf>("FILE").help("Source file")
    }

    let extract = {
        let source = positional::<PathBuf>("SOURCE").help("Directory of .zip archives");
        let destination = positional::<PathBuf>("DEST").help("Directory for extracted folders");
        let skip_existing = long("skip-existing")
            .help("Leave already extracted students untouched")
            .switch();
        let mapping = long("mapping")
            .help("Identity mapping file (default: next to DEST)")
            .argument::<PathBuf>("PATH")
            .optional();
        construct!(Cmd::Extract {
            skip_existing,
            mapping,
            source,
            destination
        })
        .to_options()
        .command("extract")
        .help("Extract submission archives, one folder per student")
    };

    let resolve = positional::<String>("NAME")
        .help("Archive or directory name")
        .some("at least one name is required")
        .map(Cmd::Resolve)
        .to_options()
        .command("resolve")
        .help("Print the student id derived from each name");

    let run = {
        let file = file();
        let lang = lang();
        let stdin = long("stdin")
            .help("Text to pipe to the program")
            .argument::<String>("TEXT")
            .optional();
        let args = positional::<String>("ARG")
            .help("Arguments passed to the program")
            .many();
        construct!(Cmd::Run {
            lang,
            stdin,
            file,
            args
        })
        .to_options()
        .command("run")
        .help("Compile (if needed) and run a source file")
    };

    let check = {
        let lang = lang();
        let file = file();
        construct!(Cmd::Check(lang, file))
            .to_options()
            .command("check")
            .help("Check a source file for compile errors")
    };

    let grade = {
        let no = positional::<u32>("ASSIGNMENT").help("Assignment number");
        let dir = positional::<PathBuf>("DIR").help("Student submission directory");
        construct!(Cmd::Grade(no, dir))
            .to_options()
            .command("grade")
            .help("Grade one student's submission")
    };

    let grade_all = {
        let only = short('a')
            .long("assignment")
            .help("Only grade this assignment")
            .argument::<u32>("NO")
            .optional();
        let root = positional::<PathBuf>("ROOT")
            .help("Root holding <assignment name>/student_submissions/");
        construct!(Cmd::GradeAll(root, only))
            .to_options()
            .command("grade-all")
            .help("Grade every submission of one or all assignments")
    };

    let batch = {
        let text = long("expected")
            .help("Expected output")
            .argument::<String>("TEXT")
            .map(Expected::Text);
        let reference = long("reference")
            .help("Reference solution whose output is expected")
            .argument::<PathBuf>("FILE")
            .map(Expected::Reference);
        let expected = construct!([text, reference]);
        let args = long("args")
            .help("Argument string passed to every program")
            .argument::<String>("ARGS")
            .fallback(String::new());
        let keep = long("keep")
            .help("Keep extracted submissions in this directory")
            .argument::<PathBuf>("DIR")
            .optional();
        let archives = positional::<PathBuf>("ARCHIVE")
            .help("Submission archive")
            .some("at least one archive is required");
        construct!(Cmd::Batch {
            expected,
            args,
            keep,
            archives
        })
        .to_options()
        .command("batch")
        .help("Grade archives against one expected output")
    };

    let toolchain = {
        let key = || positional::<String>("TOOL").help("Tool key, e.g. c, java-runtime");
        let get = construct!(ToolchainCmd::Get(key()))
            .to_options()
            .command("get")
            .help("Show how a tool resolves");
        let path = positional::<String>("PATH").help("Executable to use");
        let set = construct!(ToolchainCmd::Set(key(), path))
            .to_options()
            .command("set")
            .help("Store a toolchain override");
        let list = pure(ToolchainCmd::List)
            .to_options()
            .command("list")
            .help("Show every tool and where it resolves from");
        construct!([get, set, list])
            .to_options()
            .command("toolchain")
            .help("Toolchain overrides")
            .map(Cmd::Toolchain)
    };

    let verbose = short('v').long("verbose").help("Log debug output").switch();
    let json = long("json").help("Print JSON instead of tables").switch();
    let cmd = construct!([extract, resolve, run, check, grade, grade_all, batch, toolchain]);

    construct!(Opts { verbose, json, cmd })
        .to_options()
        .descr("Grades student programming submissions")
}

/// One row of a grading table.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Student")]
    /// Student id.
    student:    String,
    #[tabled(rename = "Assignment")]
    /// Assignment number and name.
    assignment: String,
    #[tabled(rename = "Score")]
    /// Awarded score.
    score:      String,
    #[tabled(rename = "Result")]
    /// Match or failure kind.
    result:     String,
}

impl From<&EvaluationResult> for ResultRow {
    fn from(r: &EvaluationResult) -> Self {
        Self {
            student:    r.student_id.clone(),
            assignment: format!("{} ({})", r.assignment_no, r.assignment_name),
            score:      format!("{:.2}", r.score),
            result:     match r.failure_kind {
                Some(kind) => kind.to_string(),
                None if r.matched => "matched".to_string(),
                None => "mismatch".to_string(),
            },
        }
    }
}

/// One row of the toolchain listing.
#[derive(Tabled)]
struct ToolRow {
    #[tabled(rename = "Tool")]
    /// Tool key.
    key:     String,
    #[tabled(rename = "Executable")]
    /// Resolved executable.
    program: String,
    #[tabled(rename = "Source")]
    /// Tier that supplied it.
    source:  String,
}

/// Prints grading results as a table or JSON.
fn show_results(results: &[EvaluationResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    let total: f64 = results.iter().map(|r| r.score).sum();
    let rows: Vec<ResultRow> = results.iter().map(ResultRow::from).collect();
    println!(
        "{}",
        Table::new(&rows)
            .with(Panel::header("Grading Overview"))
            .with(Panel::footer(format!("Total: {total:.2}")))
            .with(Modify::new(Rows::new(1..)).with(Width::wrap(32).keep_words(true)))
            .with(Style::modern())
    );
    for r in results.iter().filter(|r| !r.matched) {
        eprintln!("--- {} / assignment {} ---\n{}", r.student_id, r.assignment_no, r.message);
    }
    Ok(())
}

/// Prints a single execution outcome.
fn show_outcome(outcome: &ExecutionOutcome) {
    if outcome.succeeded {
        println!("{}", outcome.stdout);
    } else {
        if !outcome.stdout.is_empty() {
            println!("{}", outcome.stdout);
        }
        let kind = outcome
            .failure_kind
            .map(|k| k.to_string())
            .unwrap_or_default();
        eprintln!("{kind}: {}", outcome.stderr);
    }
}

/// Opens the toolchain override file under the data directory.
fn toolchain_store(settings: &Settings) -> Result<Arc<JsonToolchainStore>> {
    let path = settings.data_dir().join("toolchains.json");
    Ok(Arc::new(JsonToolchainStore::open(&path).with_context(|| {
        format!("Could not open toolchain store {}", path.display())
    })?))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let opts = options();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let level = if opts.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(fmt)
        .with(LevelFilter::from_level(level))
        .init();

    let settings = Settings::from_env();
    let tools = toolchain_store(&settings)?;
    let dispatcher = default_dispatcher(&settings, Some(tools.clone()));

    match opts.cmd {
        Cmd::Extract {
            source,
            destination,
            skip_existing,
            mapping,
        } => {
            let policy = if skip_existing {
                ExistingPolicy::Skip
            } else {
                ExistingPolicy::Replace
            };
            let outcomes = ArchiveExtractor::new(policy).extract_all(&source, &destination)?;
            let mapping_path = mapping.unwrap_or_else(|| {
                destination
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(destination.as_path())
                    .join(MAPPING_FILE_NAME)
            });
            archive::identity_mapping(&outcomes, &destination)?.save(&mapping_path)?;

            if opts.json {
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
            } else {
                for outcome in outcomes.values() {
                    match &outcome.error {
                        None => println!(
                            "{} -> {} ({} files)",
                            outcome.archive_name,
                            outcome.student_id,
                            outcome.files.len()
                        ),
                        Some(e) => println!("{} -> FAILED: {e}", outcome.archive_name),
                    }
                }
            }
        }
        Cmd::Resolve(names) => {
            for name in names {
                println!("{name}\t{}", identity::resolve(&name));
            }
        }
        Cmd::Run {
            file,
            lang,
            stdin,
            args,
        } => {
            let request = ExecutionRequest::builder()
                .source_path(file)
                .maybe_language(lang)
                .args(args)
                .maybe_stdin(stdin)
                .build();
            let outcome = dispatcher.dispatch(&request).await;
            show_outcome(&outcome);
            if !outcome.succeeded {
                std::process::exit(1);
            }
        }
        Cmd::Check(lang, file) => {
            let outcome = dispatcher.check(&file, lang).await;
            show_outcome(&outcome);
            if !outcome.succeeded {
                std::process::exit(1);
            }
        }
        Cmd::Grade(no, dir) => {
            let (engine, scores) = open_engine(&settings, dispatcher)?;
            let result = engine.evaluate_one(no, &dir).await;
            scores.close()?;
            show_results(&[result?], opts.json)?;
        }
        Cmd::GradeAll(root, only) => {
            let (engine, scores) = open_engine(&settings, dispatcher)?;
            let results = match only {
                Some(no) => engine.evaluate_assignment(no, &root).await,
                None => engine.evaluate_all(&root).await,
            };
            scores.close()?;
            show_results(&results?, opts.json)?;
        }
        Cmd::Batch {
            expected,
            args,
            keep,
            archives,
        } => {
            let processor = BatchSubmissionProcessor::new(dispatcher, &settings);
            let expected = match expected {
                Expected::Text(text) => text,
                Expected::Reference(solution) => {
                    processor.reference_output(&solution, &args).await?
                }
            };
            let statuses = processor
                .process(&archives, &expected, &args, keep.as_deref())
                .await?;

            if opts.json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                let rows: Vec<_> = statuses.values().collect();
                println!("{}", Table::new(rows).with(Style::modern()));
            }
        }
        Cmd::Toolchain(cmd) => match cmd {
            ToolchainCmd::Get(key) => {
                let Some(tool) = Tool::BUILT_IN.iter().find(|t| t.key == key) else {
                    bail!("Unknown tool `{key}`");
                };
                let resolved = ToolchainResolver::new(tools).resolve(tool);
                println!("{}\t({})", resolved.program.to_string_lossy(), resolved.source);
            }
            ToolchainCmd::Set(key, path) => {
                if !Tool::BUILT_IN.iter().any(|t| t.key == key) {
                    bail!("Unknown tool `{key}`");
                }
                tools.set(&key, &path)?;
                println!("{key} -> {path}");
            }
            ToolchainCmd::List => {
                let resolver = ToolchainResolver::new(tools);
                let rows: Vec<ToolRow> = Tool::BUILT_IN
                    .iter()
                    .map(|tool| {
                        let resolved = resolver.resolve(tool);
                        ToolRow {
                            key:     tool.key.to_string(),
                            program: resolved.program.to_string_lossy().to_string(),
                            source:  resolved.source.to_string(),
                        }
                    })
                    .collect();
                println!("{}", Table::new(rows).with(Style::modern()));
            }
        },
    };

    Ok(())
}

/// Opens the assignment and score stores and builds an engine over them.
fn open_engine(
    settings: &Settings,
    dispatcher: autograder::dispatch::ExecutionDispatcher,
) -> Result<(EvaluationEngine, Arc<JsonScoreStore>)> {
    let data_dir = settings.data_dir();
    let assignments_path = data_dir.join("assignments.json");
    let assignments = JsonAssignmentStore::open(&assignments_path)
        .with_context(|| format!("Could not open {}", assignments_path.display()))?;
    let scores_path = data_dir.join("scores.json");
    let scores = Arc::new(
        JsonScoreStore::open(&scores_path)
            .with_context(|| format!("Could not open {}", scores_path.display()))?,
    );

    let engine = EvaluationEngine::new(Arc::new(assignments), scores.clone(), dispatcher, settings);
    Ok((engine, scores))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parses `args` with the real command line parser.
    fn parse(args: &[&str]) -> Opts {
        parser()
            .run_inner(args)
            .unwrap_or_else(|e| panic!("{args:?} should parse: {e:?}"))
    }

    #[test]
    fn check_takes_a_file_and_language() {
        let opts = parse(&["check", "main.c", "--lang", "c"]);
        match opts.cmd {
            Cmd::Check(lang, file) => {
                assert_eq!(lang, Some(Language::C));
                assert_eq!(file, PathBuf::from("main.c"));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let opts = parse(&["check", "solution.py"]);
        assert!(matches!(opts.cmd, Cmd::Check(None, _)));
    }

    #[test]
    fn run_collects_stdin_and_arguments() {
        let opts = parse(&["-v", "run", "--stdin", "5", "main.py", "2", "3"]);
        assert!(opts.verbose);
        match opts.cmd {
            Cmd::Run {
                file,
                lang,
                stdin,
                args,
            } => {
                assert_eq!(file, PathBuf::from("main.py"));
                assert_eq!(lang, None);
                assert_eq!(stdin.as_deref(), Some("5"));
                assert_eq!(args, vec!["2", "3"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn batch_needs_an_expected_output_source() {
        let opts = parse(&["batch", "--expected", "42", "a.zip", "b.zip"]);
        match opts.cmd {
            Cmd::Batch {
                expected: Expected::Text(text),
                archives,
                args,
                keep,
            } => {
                assert_eq!(text, "42");
                assert_eq!(archives.len(), 2);
                assert!(args.is_empty());
                assert!(keep.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(parser().run_inner(&["batch", "a.zip"]).is_err());
    }

    #[test]
    fn toolchain_subcommands_parse() {
        let opts = parse(&["toolchain", "set", "c", "/usr/bin/clang"]);
        assert!(matches!(
            opts.cmd,
            Cmd::Toolchain(ToolchainCmd::Set(ref key, ref path))
                if key == "c" && path == "/usr/bin/clang"
        ));
        let opts = parse(&["--json", "toolchain", "list"]);
        assert!(opts.json);
        assert!(matches!(opts.cmd, Cmd::Toolchain(ToolchainCmd::List)));
    }
}

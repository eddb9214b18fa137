//! Compile-and-run dispatch against real toolchains. Tests skip when the
//! toolchain they need is not installed.

mod support;

use std::time::{Duration, Instant};

use autograder::{
    dispatch::ExecutionRequest,
    language::Language,
    process::MAX_CAPTURE_BYTES,
    types::FailureKind,
};
use support::{
    BROKEN_C, HELLO_C, HELLO_PY, SPIN_PY, Scratch, dispatcher, have, have_python, settings,
    write_file,
};

#[tokio::test]
async fn python_output_is_captured_and_trimmed() {
    if !have_python() {
        return;
    }
    let scratch = Scratch::new("dispatch-py");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let source = write_file(scratch.path(), "main.py", HELLO_PY);

    let request = ExecutionRequest::builder().source_path(source).build();
    let outcome = dispatcher(&settings).dispatch(&request).await;

    assert!(outcome.succeeded, "{}", outcome.stderr);
    assert_eq!(outcome.stdout, "Hello, World!");
    assert_eq!(outcome.failure_kind, None);
}

#[tokio::test]
async fn arguments_and_stdin_reach_the_program() {
    if !have_python() {
        return;
    }
    let scratch = Scratch::new("dispatch-args");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let source = write_file(
        scratch.path(),
        "main.py",
        "import sys\nprint(' '.join(sys.argv[1:]))\nprint(sys.stdin.read().strip())\n",
    );

    let request = ExecutionRequest::builder()
        .source_path(source)
        .args(vec!["3".to_string(), "4".to_string()])
        .stdin("from stdin")
        .build();
    let outcome = dispatcher(&settings).dispatch(&request).await;

    assert!(outcome.succeeded, "{}", outcome.stderr);
    assert_eq!(outcome.stdout, "3 4\nfrom stdin");
}

#[tokio::test]
async fn nonzero_exit_is_a_runtime_error() {
    if !have_python() {
        return;
    }
    let scratch = Scratch::new("dispatch-exit");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let source = write_file(scratch.path(), "main.py", "raise SystemExit('bad input')\n");

    let request = ExecutionRequest::builder().source_path(source).build();
    let outcome = dispatcher(&settings).dispatch(&request).await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.failure_kind, Some(FailureKind::RuntimeError));
    assert!(outcome.stderr.contains("bad input"), "{}", outcome.stderr);
}

#[tokio::test]
async fn runaway_programs_time_out() {
    if !have_python() {
        return;
    }
    let scratch = Scratch::new("dispatch-timeout");
    let settings = settings(scratch.path(), Duration::from_secs(1));
    let source = write_file(scratch.path(), "main.py", SPIN_PY);

    let started = Instant::now();
    let request = ExecutionRequest::builder().source_path(source).build();
    let outcome = dispatcher(&settings).dispatch(&request).await;

    assert_eq!(outcome.failure_kind, Some(FailureKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(15));
}

/// Waits up to five seconds for `pid` to exit; a zombie counts as exited.
#[cfg(target_os = "linux")]
async fn exited(pid: u32) -> bool {
    for _ in 0..50 {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return true;
        };
        // The state letter follows the parenthesised command name.
        let state = stat.rsplit(')').next().unwrap_or_default().trim_start();
        if state.starts_with('Z') {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn background_children_do_not_hold_up_the_result() {
    if !have_python() || !have("sleep") {
        return;
    }
    let scratch = Scratch::new("dispatch-orphan");
    let settings = settings(scratch.path(), Duration::from_secs(20));
    let source = write_file(
        scratch.path(),
        "main.py",
        "import subprocess\np = subprocess.Popen(['sleep', '60'])\nprint(p.pid)\n",
    );

    let started = Instant::now();
    let request = ExecutionRequest::builder().source_path(source).build();
    let outcome = dispatcher(&settings).dispatch(&request).await;

    assert!(outcome.succeeded, "{}", outcome.stderr);
    assert!(started.elapsed() < Duration::from_secs(10));
    let pid: u32 = outcome.stdout.parse().expect("child pid");
    assert!(exited(pid).await, "sleep {pid} survived its parent");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn timeouts_kill_the_whole_process_tree() {
    if !have_python() || !have("sleep") {
        return;
    }
    let scratch = Scratch::new("dispatch-tree");
    let settings = settings(scratch.path(), Duration::from_secs(2));
    let pid_file = scratch.path().join("child.pid");
    let code = format!(
        "import subprocess\np = subprocess.Popen(['sleep', '60'])\nopen('{}', 'w').write(str(p.pid))\nwhile True:\n    pass\n",
        pid_file.display()
    );
    let source = write_file(scratch.path(), "main.py", &code);

    let request = ExecutionRequest::builder().source_path(source).build();
    let outcome = dispatcher(&settings).dispatch(&request).await;
    assert_eq!(outcome.failure_kind, Some(FailureKind::Timeout));

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .expect("pid file")
        .trim()
        .parse()
        .expect("child pid");
    assert!(exited(pid).await, "sleep {pid} survived the timeout");
}

#[tokio::test]
async fn captured_output_is_capped() {
    if !have_python() {
        return;
    }
    let scratch = Scratch::new("dispatch-flood");
    let settings = settings(scratch.path(), Duration::from_secs(20));
    let source = write_file(
        scratch.path(),
        "main.py",
        "import sys\nsys.stdout.write('x' * (8 * 1024 * 1024))\n",
    );

    let request = ExecutionRequest::builder().source_path(source).build();
    let outcome = dispatcher(&settings).dispatch(&request).await;

    assert!(outcome.succeeded, "{}", outcome.stderr);
    assert_eq!(outcome.stdout.len(), MAX_CAPTURE_BYTES);
}

#[tokio::test]
async fn c_programs_compile_and_run() {
    if !have("gcc") {
        return;
    }
    let scratch = Scratch::new("dispatch-c");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let source = write_file(scratch.path(), "main.c", HELLO_C);

    let request = ExecutionRequest::builder().source_path(source).build();
    let outcome = dispatcher(&settings).dispatch(&request).await;

    assert!(outcome.succeeded, "{}", outcome.stderr);
    assert_eq!(outcome.stdout, "Hello, World!");
}

#[tokio::test]
async fn compiler_diagnostics_are_kept() {
    if !have("gcc") {
        return;
    }
    let scratch = Scratch::new("dispatch-cerr");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let source = write_file(scratch.path(), "main.c", BROKEN_C);

    let dispatcher = dispatcher(&settings);
    let request = ExecutionRequest::builder().source_path(source.clone()).build();
    let outcome = dispatcher.dispatch(&request).await;
    assert_eq!(outcome.failure_kind, Some(FailureKind::CompileError));
    assert!(!outcome.stderr.is_empty());

    let checked = dispatcher.check(&source, None).await;
    assert_eq!(checked.failure_kind, Some(FailureKind::CompileError));
}

#[tokio::test]
async fn unknown_extensions_are_unsupported() {
    let scratch = Scratch::new("dispatch-unsupported");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let source = write_file(scratch.path(), "main.rb", "puts 1");

    let request = ExecutionRequest::builder().source_path(source).build();
    let outcome = dispatcher(&settings).dispatch(&request).await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.failure_kind, Some(FailureKind::UnsupportedLanguage));
}

#[tokio::test]
async fn interpreted_sources_need_no_compilation() {
    let scratch = Scratch::new("dispatch-check");
    let settings = settings(scratch.path(), Duration::from_secs(10));

    let outcome = dispatcher(&settings)
        .check_source("print(1)", Language::Python)
        .await;

    assert!(outcome.succeeded);
    assert_eq!(outcome.stdout, "No compilation needed for Python");
}

#[tokio::test]
async fn snippets_run_in_their_own_scratch_directory() {
    if !have("gcc") {
        return;
    }
    let scratch = Scratch::new("dispatch-snippet");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let dispatcher = dispatcher(&settings);

    let first = dispatcher.execute_source(HELLO_C, Language::C, &[], None).await;
    let second = dispatcher
        .execute_source(
            "#include <stdio.h>\nint main(void){puts(\"second\");return 0;}\n",
            Language::C,
            &[],
            None,
        )
        .await;

    assert_eq!(first.stdout, "Hello, World!");
    assert_eq!(second.stdout, "second");

    let leftovers = std::fs::read_dir(scratch.path())
        .expect("read scratch")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("autograder-"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn java_runs_the_public_class() {
    if !have("javac") || !have("java") {
        return;
    }
    let scratch = Scratch::new("dispatch-java");
    let settings = settings(scratch.path(), Duration::from_secs(30));
    let code = "class Helper {}\npublic class Greeter {\n    public static void main(String[] args) {\n        System.out.println(\"Hi \" + args[0]);\n    }\n}\n";

    let before = std::env::current_dir().expect("cwd");
    let outcome = dispatcher(&settings)
        .execute_source(code, Language::Java, &["there".to_string()], None)
        .await;

    assert!(outcome.succeeded, "{}", outcome.stderr);
    assert_eq!(outcome.stdout, "Hi there");
    assert_eq!(std::env::current_dir().expect("cwd"), before);
}

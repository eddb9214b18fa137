//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use autograder::{
    config::{Settings, Timeouts},
    default_dispatcher,
    dispatch::ExecutionDispatcher,
    engine::EvaluationEngine,
    store::{MemoryAssignmentStore, ScoreStore},
    toolchain::Tool,
    types::Assignment,
};
use uuid::Uuid;
use zip::{ZipWriter, write::SimpleFileOptions};

pub const HELLO_C: &str =
    "#include <stdio.h>\nint main(void) {\n    printf(\"Hello, World!\\n\");\n    return 0;\n}\n";

pub const BROKEN_C: &str = "#include <stdio.h>\nint main(void) {\n    printf(\"oops\"\n}\n";

pub const HELLO_PY: &str = "print(\"Hello, World!\")\n";

pub const SPIN_PY: &str = "while True:\n    pass\n";

/// A unique directory under the system temp dir, removed on drop.
pub struct Scratch(PathBuf);

impl Scratch {
    pub fn new(label: &str) -> Self {
        let root = std::env::temp_dir().join(format!("autograder-{label}-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).expect("create scratch root");
        Self(root)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// True when `tool` is on PATH; prints a skip notice otherwise.
pub fn have(tool: &str) -> bool {
    let found = which::which(tool).is_ok();
    if !found {
        eprintln!("skipping: `{tool}` not found on PATH");
    }
    found
}

pub fn have_python() -> bool {
    have(Tool::PYTHON.default)
}

/// Writes a zip archive with the given `(name, contents)` entries.
pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut writer = ZipWriter::new(File::create(path).expect("create zip"));
    let options = SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).expect("start entry");
        writer.write_all(contents.as_bytes()).expect("write entry");
    }
    writer.finish().expect("finish zip");
}

/// Writes `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&path, contents).expect("write file");
    path
}

pub fn settings(scratch: &Path, run: Duration) -> Settings {
    Settings::builder()
        .timeouts(Timeouts {
            compile: Duration::from_secs(60),
            run,
        })
        .workers(2)
        .scratch_dir(scratch)
        .data_dir(scratch.join("data"))
        .build()
}

pub fn dispatcher(settings: &Settings) -> ExecutionDispatcher {
    default_dispatcher(settings, None)
}

pub fn hello_assignment() -> Assignment {
    Assignment::builder()
        .assignment_no(1)
        .name("hello")
        .expected_output("Hello, World!")
        .weight(10.0)
        .build()
}

pub fn engine(
    settings: &Settings,
    assignments: Vec<Assignment>,
    scores: Arc<dyn ScoreStore>,
) -> EvaluationEngine {
    EvaluationEngine::new(
        Arc::new(MemoryAssignmentStore::new(assignments)),
        scores,
        dispatcher(settings),
        settings,
    )
}

//! Ad-hoc batch grading of uploaded archives.

mod support;

use std::time::Duration;

use autograder::{
    batch::{BatchStatus, BatchSubmissionProcessor},
    types::FailureKind,
};
use support::{
    BROKEN_C, HELLO_PY, Scratch, dispatcher, have, have_python, settings, write_file, write_zip,
};

#[tokio::test]
async fn each_archive_gets_its_own_status() {
    if !have_python() {
        return;
    }
    let scratch = Scratch::new("batch");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let uploads = scratch.path().join("uploads");
    std::fs::create_dir_all(&uploads).expect("mkdir");

    let good = uploads.join("20220602074.zip");
    let wrong = uploads.join("student42.zip");
    let empty = uploads.join("20220602076.zip");
    let broken = uploads.join("20220602077.zip");
    write_zip(&good, &[("main.py", HELLO_PY)]);
    write_zip(&wrong, &[("main.py", "print('bye')")]);
    write_zip(&empty, &[("notes.txt", "nothing here")]);
    std::fs::write(&broken, b"not a zip").expect("write");

    let processor = BatchSubmissionProcessor::new(dispatcher(&settings), &settings);
    let statuses = processor
        .process(
            &[good, wrong, empty, broken],
            "Hello, World!",
            "",
            None,
        )
        .await
        .expect("batch runs");

    assert_eq!(statuses.len(), 4);
    let good = &statuses["20220602074.zip"];
    assert_eq!(good.student_id, "20220602074");
    assert_eq!(good.status, BatchStatus::Success);
    assert_eq!(good.failure_kind, None);
    assert_eq!(good.output.as_deref(), Some("Hello, World!"));

    let wrong = &statuses["student42.zip"];
    assert_eq!(wrong.status, BatchStatus::Failure);
    assert_eq!(wrong.failure_kind, None);

    let empty = &statuses["20220602076.zip"];
    assert_eq!(empty.status, BatchStatus::Error);
    assert_eq!(empty.failure_kind, Some(FailureKind::NoMainFileFound));
    assert_eq!(empty.message, "No main file found in submission");

    let broken = &statuses["20220602077.zip"];
    assert_eq!(broken.status, BatchStatus::Error);
    assert_eq!(broken.failure_kind, Some(FailureKind::ExtractionError));
    assert_eq!(broken.message, "Failed to extract ZIP file");
}

#[tokio::test]
async fn compile_failures_are_reported_with_their_kind() {
    if !have("gcc") {
        return;
    }
    let scratch = Scratch::new("batch-compile");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let archive = scratch.path().join("20220602075.zip");
    write_zip(&archive, &[("main.c", BROKEN_C)]);

    let processor = BatchSubmissionProcessor::new(dispatcher(&settings), &settings);
    let statuses = processor
        .process(&[archive], "Hello, World!", "", None)
        .await
        .expect("batch runs");

    let status = &statuses["20220602075.zip"];
    assert_eq!(status.status, BatchStatus::Error);
    assert_eq!(status.failure_kind, Some(FailureKind::CompileError));
    assert_eq!(status.message, "Code execution failed (compile error)");
    assert!(status.output.as_deref().is_some_and(|o| !o.is_empty()));
}

#[tokio::test]
async fn archives_claiming_the_same_student_are_not_merged() {
    if !have_python() {
        return;
    }
    let scratch = Scratch::new("batch-duplicate");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let first = scratch.path().join("20220602074.zip");
    let second = scratch.path().join("hw1_20220602074.zip");
    write_zip(&first, &[("main.py", HELLO_PY)]);
    write_zip(&second, &[("main.py", "print('resubmitted')\n")]);
    let keep = scratch.path().join("kept");

    let processor = BatchSubmissionProcessor::new(dispatcher(&settings), &settings);
    let statuses = processor
        .process(&[second, first], "Hello, World!", "", Some(keep.as_path()))
        .await
        .expect("batch runs");

    assert_eq!(statuses.len(), 2);
    let graded = &statuses["20220602074.zip"];
    assert_eq!(graded.status, BatchStatus::Success);

    let duplicate = &statuses["hw1_20220602074.zip"];
    assert_eq!(duplicate.student_id, "20220602074");
    assert_eq!(duplicate.status, BatchStatus::Error);
    assert_eq!(duplicate.failure_kind, Some(FailureKind::ExtractionError));
    assert!(duplicate.message.contains("20220602074.zip"), "{}", duplicate.message);

    let kept = std::fs::read_to_string(keep.join("20220602074").join("main.py")).expect("kept");
    assert_eq!(kept, HELLO_PY);
}

#[tokio::test]
async fn kept_extractions_stay_on_disk() {
    if !have_python() {
        return;
    }
    let scratch = Scratch::new("batch-keep");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let archive = scratch.path().join("20220602074.zip");
    write_zip(
        &archive,
        &[("main.py", "import sys\nprint(int(sys.argv[1]) + int(sys.argv[2]))\n")],
    );
    let keep = scratch.path().join("kept");

    let processor = BatchSubmissionProcessor::new(dispatcher(&settings), &settings);
    let statuses = processor
        .process(&[archive], "5", "2 3", Some(keep.as_path()))
        .await
        .expect("batch runs");

    assert_eq!(statuses["20220602074.zip"].status, BatchStatus::Success);
    assert!(keep.join("20220602074").join("main.py").exists());
}

#[tokio::test]
async fn reference_solution_supplies_expected_output() {
    if !have_python() {
        return;
    }
    let scratch = Scratch::new("batch-reference");
    let settings = settings(scratch.path(), Duration::from_secs(10));
    let reference = write_file(scratch.path(), "reference/main.py", "print('  42  ')\n");

    let processor = BatchSubmissionProcessor::new(dispatcher(&settings), &settings);
    let expected = processor
        .reference_output(&reference, "")
        .await
        .expect("reference runs");
    assert_eq!(expected, "42");

    let failing = write_file(scratch.path(), "reference/bad.py", "raise SystemExit(3)\n");
    assert!(processor.reference_output(&failing, "").await.is_err());
}

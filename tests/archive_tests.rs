//! Archive extraction: layout, zip-slip rejection, idempotence.

mod support;

use std::path::Path;

use autograder::{
    archive::{self, ArchiveExtractor, ExistingPolicy, student_files},
    identity::IdentityMapping,
};
use support::{Scratch, write_zip};
use walkdir::WalkDir;

/// Relative paths of every file under `root`, sorted.
fn tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .expect("under root")
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

#[test]
fn archive_lands_in_a_directory_named_after_the_student() {
    let scratch = Scratch::new("extract");
    let archive = scratch.path().join("20220602074.zip");
    write_zip(&archive, &[("main.c", "int main(void){return 0;}"), ("src/util.h", "")]);

    let dest = scratch.path().join("out");
    let outcome = ArchiveExtractor::default().extract(&archive, &dest);

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.student_id, "20220602074");
    assert_eq!(tree(&dest.join("20220602074")), vec!["main.c", "src/util.h"]);
    assert_eq!(outcome.files.len(), 2);
}

#[test]
fn path_escaping_entries_fail_the_archive() {
    let scratch = Scratch::new("zipslip");
    let archive = scratch.path().join("20220602074.zip");
    write_zip(&archive, &[("main.c", "ok"), ("../../evil.txt", "pwned")]);

    let dest = scratch.path().join("a").join("b");
    let outcome = ArchiveExtractor::default().extract(&archive, &dest);

    assert!(!outcome.success);
    assert_eq!(outcome.rejected, vec!["../../evil.txt".to_string()]);
    assert!(!scratch.path().join("evil.txt").exists());
    assert!(!dest.join("evil.txt").exists());
    assert!(!dest.join("20220602074").exists());
}

#[test]
fn macos_metadata_is_dropped() {
    let scratch = Scratch::new("macos");
    let archive = scratch.path().join("20220602074.zip");
    write_zip(
        &archive,
        &[
            ("main.py", "print(1)"),
            ("__MACOSX/._main.py", "junk"),
            ("._main.py", "junk"),
        ],
    );

    let dest = scratch.path().join("out");
    let outcome = ArchiveExtractor::default().extract(&archive, &dest);

    assert!(outcome.success);
    assert_eq!(tree(&dest.join("20220602074")), vec!["main.py"]);
}

#[test]
fn extracting_twice_replaces_rather_than_merges() {
    let scratch = Scratch::new("idempotent");
    let dest = scratch.path().join("out");
    let archive = scratch.path().join("20220602074.zip");
    write_zip(&archive, &[("main.c", "v1"), ("notes.txt", "n")]);

    let extractor = ArchiveExtractor::default();
    assert!(extractor.extract(&archive, &dest).success);
    let first = tree(&dest);
    assert!(extractor.extract(&archive, &dest).success);
    assert_eq!(tree(&dest), first);

    // A stale file from an earlier extraction does not survive a replace.
    std::fs::write(dest.join("20220602074").join("stale.txt"), "x").expect("write stale");
    assert!(extractor.extract(&archive, &dest).success);
    assert_eq!(tree(&dest), first);
}

#[test]
fn skip_policy_keeps_the_existing_tree() {
    let scratch = Scratch::new("skip");
    let dest = scratch.path().join("out");
    let archive = scratch.path().join("20220602074.zip");
    write_zip(&archive, &[("main.c", "v1")]);
    assert!(ArchiveExtractor::default().extract(&archive, &dest).success);

    write_zip(&archive, &[("main.c", "v2")]);
    let outcome = ArchiveExtractor::new(ExistingPolicy::Skip).extract(&archive, &dest);

    assert!(outcome.success);
    assert!(outcome.skipped);
    let kept = std::fs::read_to_string(dest.join("20220602074").join("main.c")).expect("read");
    assert_eq!(kept, "v1");
}

#[test]
fn corrupt_archives_fail_without_touching_others() {
    let scratch = Scratch::new("corrupt");
    let source = scratch.path().join("in");
    std::fs::create_dir_all(&source).expect("mkdir");
    std::fs::write(source.join("20220602075.zip"), b"definitely not a zip").expect("write");
    write_zip(&source.join("20220602074.zip"), &[("main.c", "ok")]);

    let dest = scratch.path().join("out");
    let outcomes = ArchiveExtractor::default()
        .extract_all(&source, &dest)
        .expect("list archives");

    assert_eq!(
        outcomes.keys().cloned().collect::<Vec<_>>(),
        vec!["20220602074.zip", "20220602075.zip"]
    );
    assert!(outcomes["20220602074.zip"].success);
    assert!(!outcomes["20220602075.zip"].success);
    assert!(outcomes["20220602075.zip"].error.is_some());
    assert!(!dest.join("20220602075").exists());
}

#[test]
fn extract_all_feeds_the_identity_mapping() {
    let scratch = Scratch::new("mapping");
    let source = scratch.path().join("in");
    std::fs::create_dir_all(&source).expect("mkdir");
    write_zip(&source.join("student42.zip"), &[("main.py", "print(42)")]);
    write_zip(
        &source.join("HW1_20220602074.zip"),
        &[("main.c", ""), ("helper.c", "")],
    );
    std::fs::write(source.join("readme.txt"), "not an archive").expect("write");

    let dest = scratch.path().join("out");
    let outcomes = ArchiveExtractor::default()
        .extract_all(&source, &dest)
        .expect("extract all");
    assert_eq!(outcomes.len(), 2);

    let files = student_files(&dest).expect("student files");
    assert_eq!(
        files.keys().cloned().collect::<Vec<_>>(),
        vec!["20220602074", "student42"]
    );

    let mapping = archive::identity_mapping(&outcomes, &dest).expect("mapping");
    assert_eq!(mapping.zip_to_student_id["HW1_20220602074.zip"], "20220602074");
    assert_eq!(mapping.zip_to_student_id["student42.zip"], "student42");
    assert_eq!(mapping.student_data["20220602074"].file_count, 2);

    let path = scratch.path().join("student_mappings.json");
    mapping.save(&path).expect("save");
    assert_eq!(IdentityMapping::load(&path).expect("load"), mapping);
}

#[test]
fn unusable_student_ids_are_refused() {
    let scratch = Scratch::new("badid");
    let archive = scratch.path().join("..zip");
    write_zip(&archive, &[("main.c", "")]);

    let dest = scratch.path().join("out");
    let outcome = ArchiveExtractor::default().extract(&archive, &dest);
    assert!(!outcome.success);
    assert!(outcome.error.is_some());
}

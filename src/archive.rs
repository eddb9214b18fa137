#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Safe, all-or-nothing extraction of submission archives into one
//! directory per student.

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::{
    error::ExtractError,
    identity::{self, IdentityMapping},
    util::{find_files, is_hidden_name},
};

/// What to do when a student's directory already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExistingPolicy {
    /// Swap in the freshly extracted tree.
    #[default]
    Replace,
    /// Keep the existing tree untouched.
    Skip,
}

/// Report for one archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionOutcome {
    /// File name of the archive.
    pub archive_name:   String,
    /// Student the archive was attributed to.
    pub student_id:     String,
    /// Whether the student's directory now holds this archive's contents.
    pub success:        bool,
    /// Whether an existing directory was kept under [`ExistingPolicy::Skip`].
    pub skipped:        bool,
    /// The student's directory.
    pub extracted_root: PathBuf,
    /// Files now present under `extracted_root`, sorted.
    pub files:          Vec<PathBuf>,
    /// Entries refused because they would escape the destination.
    pub rejected:       Vec<String>,
    /// Why extraction failed, if it did.
    pub error:          Option<String>,
}

/// True for macOS metadata that should be silently dropped.
pub fn is_metadata_entry(name: &str) -> bool {
    let normalized = name.replace('\\', "/");
    normalized.split('/').next() == Some("__MACOSX")
        || normalized.split('/').any(|part| part.starts_with("._"))
}

/// Resolves an entry name to a relative path that stays inside the
/// destination, or `None` if it would escape.
pub fn safe_entry_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return None;
    }

    let mut resolved = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    // `C:` style drive letters are plain components on unix.
    if resolved
        .components()
        .next()
        .is_some_and(|c| c.as_os_str().to_string_lossy().ends_with(':'))
    {
        return None;
    }
    Some(resolved)
}

/// Whether a student id can be used verbatim as one directory name.
fn is_safe_dir_name(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\', ':']) && !is_hidden_name(id)
}

/// Lists regular files under `root`, sorted, skipping hidden entries.
fn list_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_name(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Unpacks archives, one directory per resolved student id.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    /// Behaviour when a student directory exists already.
    policy: ExistingPolicy,
}

impl ArchiveExtractor {
    /// Creates an extractor with the given existing-directory policy.
    pub fn new(policy: ExistingPolicy) -> Self {
        Self { policy }
    }

    /// Extracts `archive` into `destination_root/<student_id>/`.
    ///
    /// The tree is built in a hidden staging directory and moved into place
    /// only when every entry succeeded, so a failed archive never leaves a
    /// partial or mixed tree behind.
    pub fn extract(&self, archive: &Path, destination_root: &Path) -> ExtractionOutcome {
        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| archive.display().to_string());
        let student_id = identity::resolve(&archive_name);
        let target = destination_root.join(&student_id);

        let mut outcome = ExtractionOutcome {
            archive_name,
            student_id,
            success: false,
            skipped: false,
            extracted_root: target.clone(),
            files: Vec::new(),
            rejected: Vec::new(),
            error: None,
        };

        if !is_safe_dir_name(&outcome.student_id) {
            let err = ExtractError::InvalidStudentId(outcome.student_id.clone());
            tracing::warn!("{err}");
            outcome.error = Some(err.to_string());
            return outcome;
        }

        if target.exists() && self.policy == ExistingPolicy::Skip {
            tracing::info!("Keeping existing {}", target.display());
            outcome.success = true;
            outcome.skipped = true;
            outcome.files = list_files(&target);
            return outcome;
        }

        match self.extract_staged(archive, destination_root, &target, &mut outcome.rejected) {
            Ok(()) => {
                outcome.success = true;
                outcome.files = list_files(&target);
                tracing::info!(
                    "Extracted {} ({} files) for student {}",
                    outcome.archive_name,
                    outcome.files.len(),
                    outcome.student_id
                );
            }
            Err(err) => {
                tracing::warn!("{err}");
                outcome.error = Some(err.to_string());
            }
        }
        outcome
    }

    /// Extracts into staging, then swaps the staged tree into `target`.
    fn extract_staged(
        &self,
        archive: &Path,
        destination_root: &Path,
        target: &Path,
        rejected: &mut Vec<String>,
    ) -> Result<(), ExtractError> {
        let io_err = |source| ExtractError::Io {
            archive: archive.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(destination_root).map_err(io_err)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(destination_root)
            .map_err(io_err)?;
        let staged_root = staging.path().join("tree");
        std::fs::create_dir_all(&staged_root).map_err(io_err)?;

        unpack(archive, &staged_root, rejected)?;

        if target.exists() {
            // Park the old tree inside staging so it is removed with it.
            std::fs::rename(target, staging.path().join("previous")).map_err(io_err)?;
        }
        std::fs::rename(&staged_root, target).map_err(io_err)?;
        Ok(())
    }

    /// Extracts every `*.zip` directly inside `source_dir`, in name order.
    ///
    /// Only a failure to list `source_dir` is an error; per-archive problems
    /// are reported in the returned outcomes.
    pub fn extract_all(
        &self,
        source_dir: &Path,
        destination_root: &Path,
    ) -> Result<BTreeMap<String, ExtractionOutcome>> {
        let archives = find_files("zip", 0, source_dir)
            .with_context(|| format!("Could not list archives in {}", source_dir.display()))?;
        tracing::info!("Found {} archives in {}", archives.len(), source_dir.display());

        let mut owners: BTreeMap<String, String> = BTreeMap::new();
        let mut results = BTreeMap::new();
        for archive in archives {
            let outcome = self.extract(&archive, destination_root);
            if outcome.success
                && let Some(previous) =
                    owners.insert(outcome.student_id.clone(), outcome.archive_name.clone())
            {
                tracing::warn!(
                    "{} and {} both resolve to student {}; the later archive wins",
                    previous,
                    outcome.archive_name,
                    outcome.student_id
                );
            }
            results.insert(outcome.archive_name.clone(), outcome);
        }
        Ok(results)
    }
}

/// Writes every safe, non-metadata entry of `archive` under `root`.
///
/// Unsafe entries are collected into `rejected`; any rejection fails the
/// archive after the scan so the caller sees every offending name.
fn unpack(archive: &Path, root: &Path, rejected: &mut Vec<String>) -> Result<(), ExtractError> {
    let io_err = |source| ExtractError::Io {
        archive: archive.to_path_buf(),
        source,
    };
    let corrupt = |source| ExtractError::Corrupt {
        archive: archive.to_path_buf(),
        source,
    };

    let reader = BufReader::new(File::open(archive).map_err(io_err)?);
    let mut zip = ZipArchive::new(reader).map_err(corrupt)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(corrupt)?;
        let name = entry.name().to_string();

        if is_metadata_entry(&name) {
            tracing::debug!("Skipping metadata entry {name}");
            continue;
        }

        let Some(relative) = safe_entry_path(&name) else {
            tracing::warn!("Rejecting unsafe entry `{name}` in {}", archive.display());
            rejected.push(name);
            continue;
        };
        if !rejected.is_empty() || relative.as_os_str().is_empty() {
            continue;
        }

        let out_path = root.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(io_err)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut out = File::create(&out_path).map_err(io_err)?;
        std::io::copy(&mut entry, &mut out).map_err(io_err)?;
    }

    match rejected.first() {
        Some(entry) => Err(ExtractError::UnsafeEntry {
            archive: archive.to_path_buf(),
            entry:   entry.clone(),
        }),
        None => Ok(()),
    }
}

/// Maps each student directory under `root` to its files, sorted.
pub fn student_files(root: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut students = BTreeMap::new();
    if !root.exists() {
        return Ok(students);
    }
    for entry in
        std::fs::read_dir(root).with_context(|| format!("Could not read {}", root.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_dir() && !is_hidden_name(&name) {
            students.insert(name, list_files(&entry.path()));
        }
    }
    Ok(students)
}

/// Builds the identity mapping file contents from extraction outcomes and
/// the directories now present under `destination_root`.
pub fn identity_mapping(
    outcomes: &BTreeMap<String, ExtractionOutcome>,
    destination_root: &Path,
) -> Result<IdentityMapping> {
    let mut mapping = IdentityMapping::default();
    for (archive, outcome) in outcomes {
        if outcome.success {
            mapping
                .zip_to_student_id
                .insert(archive.clone(), outcome.student_id.clone());
        }
    }
    for (student_id, files) in student_files(destination_root)? {
        mapping.record_student(&student_id, &files);
    }
    Ok(mapping)
}

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Student identity resolution from archive and directory names.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Student ids are 8 to 12 digit runs.
static STUDENT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{8,12}").expect("student id pattern is valid"));

/// Name of the identity mapping file written next to extracted submissions.
pub const MAPPING_FILE_NAME: &str = "student_mappings.json";

/// Strips a single trailing extension, keeping dotfiles intact.
fn base_name(name: &str) -> &str {
    let name = name.trim_end_matches(['/', '\\']);
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Derives a student id from an archive file name or a directory name.
///
/// 1. an all-digit base name is used verbatim;
/// 2. else the first 8-12 digit run in the base name;
/// 3. else the base name itself, as an opaque identifier.
///
/// Pure: the same input always yields the same id.
pub fn resolve(filename_or_dirname: &str) -> String {
    let base = base_name(filename_or_dirname);

    if !base.is_empty() && base.chars().all(|c| c.is_ascii_digit()) {
        return base.to_string();
    }

    if let Some(id) = numeric_run(base) {
        return id.to_string();
    }

    tracing::debug!("no numeric student id in `{base}`, using it as an opaque identifier");
    base.to_string()
}

/// Finds the first run of 8 to 12 digits in `base`.
///
/// Matching is greedy and leftmost, so a longer run yields its first twelve
/// digits.
fn numeric_run(base: &str) -> Option<&str> {
    STUDENT_ID_PATTERN.find(base).map(|m| m.as_str())
}

/// Per-student summary stored in the mapping file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentData {
    /// Resolved student id.
    pub student_id: String,
    /// Number of extracted files.
    pub file_count: usize,
    /// Base names of the extracted files.
    pub files:      Vec<String>,
}

/// Persisted record of which archive belonged to which student.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapping {
    /// Archive file name to student id.
    #[serde(default)]
    pub zip_to_student_id: BTreeMap<String, String>,
    /// Student id to a summary of what was extracted.
    #[serde(default)]
    pub student_data:      BTreeMap<String, StudentData>,
}

impl IdentityMapping {
    /// Records the files extracted for a student.
    pub fn record_student(&mut self, student_id: &str, files: &[PathBuf]) {
        let names = files
            .iter()
            .filter_map(|f| f.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect::<Vec<_>>();
        self.student_data.insert(
            student_id.to_string(),
            StudentData {
                student_id: student_id.to_string(),
                file_count: names.len(),
                files:      names,
            },
        );
    }

    /// Looks up the student id for a directory created from an archive.
    ///
    /// Matches either the archive name itself or its extension-less stem.
    pub fn student_for(&self, dir_name: &str) -> Option<&str> {
        self.zip_to_student_id
            .iter()
            .find(|(zip, id)| base_name(zip) == dir_name || *zip == dir_name || *id == dir_name)
            .map(|(_, id)| id.as_str())
    }

    /// Reads a mapping file. A missing file yields an empty mapping.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Could not parse {}", path.display()))
    }

    /// Writes the mapping file as pretty printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("Could not write {}", path.display()))
    }
}

/// Resolves the id for an extracted student directory.
///
/// An all-digit directory name wins, then the mapping file, then [`resolve`].
pub fn resolve_directory(dir_name: &str, mapping: &IdentityMapping) -> String {
    if !dir_name.is_empty() && dir_name.chars().all(|c| c.is_ascii_digit()) {
        return dir_name.to_string();
    }
    match mapping.student_for(dir_name) {
        Some(id) => id.to_string(),
        None => resolve(dir_name),
    }
}

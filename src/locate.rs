#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Finds the file to compile and run inside a student's submission tree.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::util::is_hidden_name;

/// File stems recognised as entry points, in priority order.
pub const ENTRY_STEMS: [&str; 4] = ["main", "solution", "assignment", "program"];

/// Every source file under `root` whose extension is in `extensions`,
/// shallowest first, then by path.
fn candidates(root: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut found: Vec<(usize, PathBuf)> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_name(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| extensions.iter().any(|ext| ext.eq_ignore_ascii_case(x)))
        })
        .map(|e| (e.depth(), e.into_path()))
        .collect();
    found.sort();
    found.into_iter().map(|(_, p)| p).collect()
}

/// Lower-cased file name of a path.
fn lower_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Picks the entry source file under `root`.
///
/// Canonical names (`main`, `solution`, `assignment`, `program` with any
/// supported extension) win in that order; otherwise a file whose name
/// starts with `main`, otherwise the first candidate found.
pub fn find_entry_file(root: &Path, extensions: &[&str]) -> Option<PathBuf> {
    let files = candidates(root, extensions);
    tracing::debug!("{} candidate sources under {}", files.len(), root.display());

    for stem in ENTRY_STEMS {
        for ext in extensions {
            let wanted = format!("{stem}.{ext}").to_lowercase();
            if let Some(hit) = files.iter().find(|f| lower_name(f) == wanted) {
                return Some(hit.clone());
            }
        }
    }

    files
        .iter()
        .find(|f| lower_name(f).starts_with("main"))
        .or_else(|| files.first())
        .cloned()
}

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use tempfile::TempDir;

/// A glob utility function to find paths to files with certain extension
///
/// * `extension`: the file extension to find paths for
/// * `search_depth`: how many folders deep to search for
/// * `root_dir`: the root directory where search starts
///
/// Results are sorted so callers see the same order on every platform.
pub fn find_files(extension: &str, search_depth: i8, root_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pattern = PathBuf::from(glob::Pattern::escape(
        root_dir
            .to_str()
            .context("Could not convert root_dir to string")?,
    ));

    for _ in 0..search_depth {
        pattern.push("**");
    }

    pattern.push(format!("*.{extension}"));
    let pattern = pattern
        .to_str()
        .context("Could not convert pattern to string")?
        .to_string();

    let mut found: Vec<PathBuf> = glob(&pattern)
        .context("Could not create glob")?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    found.sort();
    Ok(found)
}

/// Creates a uniquely named directory under `root` that is deleted when the
/// returned guard drops.
pub fn scratch_dir(root: &Path) -> Result<TempDir> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("Could not create scratch root {}", root.display()))?;
    tempfile::Builder::new()
        .prefix("autograder-")
        .tempdir_in(root)
        .with_context(|| format!("Could not create a scratch directory in {}", root.display()))
}

/// True for names that editors and archivers leave behind: dotfiles and
/// macOS resource forks.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.') || name == "__MACOSX"
}

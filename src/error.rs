#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while unpacking a single submission archive.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The file could not be read as a ZIP archive.
    #[error("{archive} is not a readable zip archive: {source}")]
    Corrupt {
        /// Archive that failed to open.
        archive: PathBuf,
        /// Underlying zip error.
        #[source]
        source:  zip::result::ZipError,
    },

    /// An entry would have been written outside the destination directory.
    #[error("entry `{entry}` in {archive} escapes the destination directory")]
    UnsafeEntry {
        /// Archive that contained the entry.
        archive: PathBuf,
        /// Raw entry name as stored in the archive.
        entry:   String,
    },

    /// The student id derived from the archive name cannot name a directory.
    #[error("student id `{0}` cannot be used as a directory name")]
    InvalidStudentId(String),

    /// Filesystem failure while writing extracted files.
    #[error("I/O error while extracting {archive}: {source}")]
    Io {
        /// Archive being extracted.
        archive: PathBuf,
        /// Underlying I/O error.
        #[source]
        source:  std::io::Error,
    },
}

/// Errors raised by the assignment, score, and toolchain stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing file could not be read or written.
    #[error("store file {path}: {source}")]
    Io {
        /// Backing file.
        path:   PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file did not contain valid JSON for this store.
    #[error("store file {path} is malformed: {source}")]
    Malformed {
        /// Backing file.
        path:   PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The store was used after `close()`.
    #[error("store has been closed")]
    Closed,
}

/// Request-level failures reported before any submission is processed.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No assignment with the requested number exists.
    #[error("assignment {0} not found")]
    AssignmentNotFound(u32),

    /// The assignment store could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

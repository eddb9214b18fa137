#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Collaborator stores: assignments (read), scores (write), and toolchain
//! overrides (read/write).
//!
//! Handles are constructed explicitly and passed to the engine; nothing here
//! is process-global. JSON-backed stores write through on every mutation and
//! replace their file atomically.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{error::StoreError, types::Assignment};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Read access to assignment records.
pub trait AssignmentStore: Send + Sync {
    /// Returns the assignment with this number, if any.
    fn get(&self, assignment_no: u32) -> StoreResult<Option<Assignment>>;
    /// Returns every assignment, ordered by number.
    fn all(&self) -> StoreResult<Vec<Assignment>>;
}

/// Write access to student scores, keyed by `(assignment_no, student_id)`.
pub trait ScoreStore: Send + Sync {
    /// Inserts or replaces the score for a key.
    fn upsert(&self, assignment_no: u32, student_id: &str, score: f64) -> StoreResult<()>;
    /// Returns the stored score for a key.
    fn get(&self, assignment_no: u32, student_id: &str) -> StoreResult<Option<f64>>;
    /// Returns every stored score, ordered by key.
    fn all(&self) -> StoreResult<Vec<ScoreRecord>>;
}

/// Explicit per-tool executable overrides.
///
/// Reads never write: a missing key stays missing until `set` is called.
pub trait ToolchainConfigStore: Send + Sync {
    /// Returns the configured executable for a tool key.
    fn get(&self, tool: &str) -> StoreResult<Option<String>>;
    /// Sets the executable for a tool key.
    fn set(&self, tool: &str, path: &str) -> StoreResult<()>;
    /// Returns every configured override.
    fn all(&self) -> StoreResult<BTreeMap<String, String>>;
}

/// One persisted score row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Assignment the score belongs to.
    pub assignment_no: u32,
    /// Student the score belongs to.
    pub student_id:    String,
    /// Awarded score.
    pub score:         f64,
}

/// Key type for score maps.
type ScoreKey = (u32, String);

/// Converts a score map into ordered records.
fn score_records(map: &BTreeMap<ScoreKey, f64>) -> Vec<ScoreRecord> {
    map.iter()
        .map(|((assignment_no, student_id), score)| ScoreRecord {
            assignment_no: *assignment_no,
            student_id:    student_id.clone(),
            score:         *score,
        })
        .collect()
}

/// Reads and parses a JSON file, returning `None` when it does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Serializes `value` next to `path` and renames it into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let text = serde_json::to_string_pretty(value).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    std::fs::write(&tmp, text).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(|source| {
        let _ = std::fs::remove_file(&tmp);
        io_err(source)
    })
}

/// In-memory assignment store.
#[derive(Debug, Default)]
pub struct MemoryAssignmentStore {
    /// Assignments keyed by number.
    assignments: BTreeMap<u32, Assignment>,
}

impl MemoryAssignmentStore {
    /// Creates a store from a list of assignments; later duplicates win.
    pub fn new(assignments: impl IntoIterator<Item = Assignment>) -> Self {
        Self {
            assignments: assignments
                .into_iter()
                .map(|a| (a.assignment_no, a))
                .collect(),
        }
    }
}

impl AssignmentStore for MemoryAssignmentStore {
    fn get(&self, assignment_no: u32) -> StoreResult<Option<Assignment>> {
        Ok(self.assignments.get(&assignment_no).cloned())
    }

    fn all(&self) -> StoreResult<Vec<Assignment>> {
        Ok(self.assignments.values().cloned().collect())
    }
}

/// Assignment store loaded from a JSON array of assignment records.
#[derive(Debug)]
pub struct JsonAssignmentStore {
    /// Parsed records.
    inner: MemoryAssignmentStore,
}

impl JsonAssignmentStore {
    /// Loads assignments from `path`; a missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let assignments: Vec<Assignment> = read_json(path.as_ref())?.unwrap_or_default();
        Ok(Self {
            inner: MemoryAssignmentStore::new(assignments),
        })
    }
}

impl AssignmentStore for JsonAssignmentStore {
    fn get(&self, assignment_no: u32) -> StoreResult<Option<Assignment>> {
        self.inner.get(assignment_no)
    }

    fn all(&self) -> StoreResult<Vec<Assignment>> {
        self.inner.all()
    }
}

/// In-memory score store. One lock serializes every upsert.
#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    /// Scores keyed by `(assignment_no, student_id)`.
    scores: Mutex<BTreeMap<ScoreKey, f64>>,
}

impl MemoryScoreStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScoreStore for MemoryScoreStore {
    fn upsert(&self, assignment_no: u32, student_id: &str, score: f64) -> StoreResult<()> {
        self.scores
            .lock()
            .expect("score store poisoned")
            .insert((assignment_no, student_id.to_string()), score);
        Ok(())
    }

    fn get(&self, assignment_no: u32, student_id: &str) -> StoreResult<Option<f64>> {
        Ok(self
            .scores
            .lock()
            .expect("score store poisoned")
            .get(&(assignment_no, student_id.to_string()))
            .copied())
    }

    fn all(&self) -> StoreResult<Vec<ScoreRecord>> {
        Ok(score_records(&self.scores.lock().expect("score store poisoned")))
    }
}

/// Score store persisted as a JSON array of [`ScoreRecord`]s.
#[derive(Debug)]
pub struct JsonScoreStore {
    /// Backing file.
    path:   PathBuf,
    /// Current contents; `None` once closed.
    scores: Mutex<Option<BTreeMap<ScoreKey, f64>>>,
}

impl JsonScoreStore {
    /// Opens (or starts) a score file.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let records: Vec<ScoreRecord> = read_json(&path)?.unwrap_or_default();
        let scores = records
            .into_iter()
            .map(|r| ((r.assignment_no, r.student_id), r.score))
            .collect();
        Ok(Self {
            path,
            scores: Mutex::new(Some(scores)),
        })
    }

    /// Flushes the file and releases the handle. Later calls fail with
    /// [`StoreError::Closed`].
    pub fn close(&self) -> StoreResult<()> {
        let mut guard = self.scores.lock().expect("score store poisoned");
        if let Some(scores) = guard.take() {
            write_json_atomic(&self.path, &score_records(&scores))?;
        }
        Ok(())
    }
}

impl ScoreStore for JsonScoreStore {
    fn upsert(&self, assignment_no: u32, student_id: &str, score: f64) -> StoreResult<()> {
        let mut guard = self.scores.lock().expect("score store poisoned");
        let scores = guard.as_mut().ok_or(StoreError::Closed)?;
        scores.insert((assignment_no, student_id.to_string()), score);
        write_json_atomic(&self.path, &score_records(scores))
    }

    fn get(&self, assignment_no: u32, student_id: &str) -> StoreResult<Option<f64>> {
        let guard = self.scores.lock().expect("score store poisoned");
        let scores = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(scores.get(&(assignment_no, student_id.to_string())).copied())
    }

    fn all(&self) -> StoreResult<Vec<ScoreRecord>> {
        let guard = self.scores.lock().expect("score store poisoned");
        let scores = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(score_records(scores))
    }
}

/// In-memory toolchain override store.
#[derive(Debug, Default)]
pub struct MemoryToolchainStore {
    /// Tool key to executable.
    tools: Mutex<BTreeMap<String, String>>,
}

impl MemoryToolchainStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToolchainConfigStore for MemoryToolchainStore {
    fn get(&self, tool: &str) -> StoreResult<Option<String>> {
        Ok(self
            .tools
            .lock()
            .expect("toolchain store poisoned")
            .get(tool)
            .cloned())
    }

    fn set(&self, tool: &str, path: &str) -> StoreResult<()> {
        self.tools
            .lock()
            .expect("toolchain store poisoned")
            .insert(tool.to_string(), path.to_string());
        Ok(())
    }

    fn all(&self) -> StoreResult<BTreeMap<String, String>> {
        Ok(self.tools.lock().expect("toolchain store poisoned").clone())
    }
}

/// Toolchain overrides persisted as a JSON object of `tool -> path`.
#[derive(Debug)]
pub struct JsonToolchainStore {
    /// Backing file.
    path:  PathBuf,
    /// Current contents.
    tools: Mutex<BTreeMap<String, String>>,
}

impl JsonToolchainStore {
    /// Opens (or starts) a toolchain file.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let tools = read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            tools: Mutex::new(tools),
        })
    }
}

impl ToolchainConfigStore for JsonToolchainStore {
    fn get(&self, tool: &str) -> StoreResult<Option<String>> {
        Ok(self
            .tools
            .lock()
            .expect("toolchain store poisoned")
            .get(tool)
            .cloned())
    }

    fn set(&self, tool: &str, path: &str) -> StoreResult<()> {
        let mut tools = self.tools.lock().expect("toolchain store poisoned");
        tools.insert(tool.to_string(), path.to_string());
        write_json_atomic(&self.path, &*tools)
    }

    fn all(&self) -> StoreResult<BTreeMap<String, String>> {
        Ok(self.tools.lock().expect("toolchain store poisoned").clone())
    }
}

//! Run store: one directory per run under a work root.
//!
//! Layout:
//!
//! ```text
//! <root>/scheduler.json
//! <root>/runs/<run_id>/state.json
//! <root>/runs/<run_id>/<artifacts...>
//! <root>/archive/<run_id>/...
//! ```

use reel_models::{ArtifactRef, RunId, RunState, RunStatus};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::fs_utils::{copy_atomic, move_dir, write_atomic};

const STATE_FILE: &str = "state.json";
const SCHEDULER_FILE: &str = "scheduler.json";
const RUNS_DIR: &str = "runs";
const ARCHIVE_DIR: &str = "archive";

/// What happens to a published run's directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    #[default]
    Delete,
    Keep,
    Archive,
}

impl Retention {
    pub fn as_str(&self) -> &'static str {
        match self {
            Retention::Delete => "delete",
            Retention::Keep => "keep",
            Retention::Archive => "archive",
        }
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Retention {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "delete" => Ok(Retention::Delete),
            "keep" => Ok(Retention::Keep),
            "archive" => Ok(Retention::Archive),
            other => Err(StorageError::config_error(format!(
                "unknown retention policy: {}",
                other
            ))),
        }
    }
}

/// Where a finished run's directory ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Deleted,
    Kept(PathBuf),
    Archived(PathBuf),
}

/// Filesystem-backed store for run directories.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
    retention: Retention,
}

impl RunStore {
    /// Open (and create if needed) a store under `root`.
    pub async fn open(root: impl Into<PathBuf>, retention: Retention) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(RUNS_DIR)).await?;
        if retention == Retention::Archive {
            fs::create_dir_all(root.join(ARCHIVE_DIR)).await?;
        }
        debug!(root = %root.display(), retention = %retention, "Opened run store");
        Ok(Self { root, retention })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Directory of a run.
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(RUNS_DIR).join(run_id.as_str())
    }

    pub fn archive_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(run_id.as_str())
    }

    /// Create the directory for a new run and persist its initial state.
    pub async fn create_run(&self, state: &RunState) -> StorageResult<PathBuf> {
        let dir = self.run_dir(&state.id);
        if fs::try_exists(&dir).await? {
            return Err(StorageError::AlreadyExists(dir));
        }
        fs::create_dir_all(&dir).await?;
        self.save_state(state).await?;
        info!(run_id = %state.id, dir = %dir.display(), "Created run directory");
        Ok(dir)
    }

    /// Resolve an artifact reference to its path inside the run directory.
    ///
    /// The file name must be relative and stay within the run directory.
    pub fn resolve(&self, artifact: &ArtifactRef) -> StorageResult<PathBuf> {
        let relative = Path::new(&artifact.file_name);
        let valid = !artifact.file_name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::invalid_path(artifact.file_name.clone()));
        }
        Ok(self.run_dir(&artifact.run_id).join(relative))
    }

    /// Durably write an artifact's bytes.
    pub async fn write_artifact(&self, artifact: &ArtifactRef, data: &[u8]) -> StorageResult<PathBuf> {
        let path = self.resolve(artifact)?;
        write_atomic(&path, data).await?;
        debug!(artifact = %artifact, bytes = data.len(), "Wrote artifact");
        Ok(path)
    }

    /// Durably write an artifact as pretty JSON.
    pub async fn write_json<T: Serialize>(&self, artifact: &ArtifactRef, value: &T) -> StorageResult<PathBuf> {
        let data = serde_json::to_vec_pretty(value)?;
        self.write_artifact(artifact, &data).await
    }

    /// Copy an existing file into place as an artifact.
    pub async fn import_artifact(&self, artifact: &ArtifactRef, src: impl AsRef<Path>) -> StorageResult<PathBuf> {
        let path = self.resolve(artifact)?;
        copy_atomic(src, &path).await?;
        Ok(path)
    }

    pub async fn read_artifact(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>> {
        let path = self.resolve(artifact)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(artifact.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_text(&self, artifact: &ArtifactRef) -> StorageResult<String> {
        let data = self.read_artifact(artifact).await?;
        String::from_utf8(data).map_err(|e| {
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    pub async fn read_json<T: DeserializeOwned>(&self, artifact: &ArtifactRef) -> StorageResult<T> {
        let data = self.read_artifact(artifact).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Persist run state as `state.json`.
    pub async fn save_state(&self, state: &RunState) -> StorageResult<()> {
        let path = self.run_dir(&state.id).join(STATE_FILE);
        let data = serde_json::to_vec_pretty(state)?;
        write_atomic(&path, &data).await
    }

    /// Load a run's persisted state.
    pub async fn load_state(&self, run_id: &RunId) -> StorageResult<RunState> {
        let path = self.run_dir(run_id).join(STATE_FILE);
        match fs::read(&path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(format!("run {}", run_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All runs with a readable state file, oldest first.
    ///
    /// Directories without a parseable `state.json` are skipped with a
    /// warning.
    pub async fn list_runs(&self) -> StorageResult<Vec<RunState>> {
        let mut runs = Vec::new();
        let mut entries = fs::read_dir(self.root.join(RUNS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match self.load_state(&RunId::from_string(name.clone())).await {
                Ok(state) => runs.push(state),
                Err(e) => warn!(dir = %name, error = %e, "Skipping unreadable run directory"),
            }
        }
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(runs)
    }

    /// Non-terminal runs left behind by an interrupted process.
    pub async fn list_incomplete(&self) -> StorageResult<Vec<RunState>> {
        Ok(self
            .list_runs()
            .await?
            .into_iter()
            .filter(|r| !r.is_terminal())
            .collect())
    }

    /// Failed runs, oldest first.
    pub async fn list_failed(&self) -> StorageResult<Vec<RunState>> {
        Ok(self
            .list_runs()
            .await?
            .into_iter()
            .filter(|r| r.status == RunStatus::Failed)
            .collect())
    }

    /// Apply retention to a terminal run.
    ///
    /// Failed runs are always kept for inspection; published runs follow
    /// the store's retention policy.
    pub async fn finalize(&self, state: &RunState) -> StorageResult<Disposition> {
        let dir = self.run_dir(&state.id);
        if state.status != RunStatus::Published {
            return Ok(Disposition::Kept(dir));
        }
        match self.retention {
            Retention::Keep => Ok(Disposition::Kept(dir)),
            Retention::Delete => {
                fs::remove_dir_all(&dir).await?;
                info!(run_id = %state.id, "Deleted published run directory");
                Ok(Disposition::Deleted)
            }
            Retention::Archive => {
                let target = self.archive_dir(&state.id);
                move_dir(&dir, &target).await?;
                info!(run_id = %state.id, archive = %target.display(), "Archived published run");
                Ok(Disposition::Archived(target))
            }
        }
    }

    /// Persist the scheduler's private state.
    pub async fn save_scheduler_state<T: Serialize>(&self, value: &T) -> StorageResult<()> {
        let data = serde_json::to_vec_pretty(value)?;
        write_atomic(self.root.join(SCHEDULER_FILE), &data).await
    }

    /// Load the scheduler's private state, if any was saved.
    pub async fn load_scheduler_state<T: DeserializeOwned>(&self) -> StorageResult<Option<T>> {
        match fs::read(self.root.join(SCHEDULER_FILE)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

//! Durable run progress: a single versioned JSON snapshot that is replaced
//! atomically on every checkpoint and removed on clean completion.

use crate::models::{FileOutcome, RunProgress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

pub const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_FILE: &str = "processing_progress.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("progress snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("progress snapshot I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize progress snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    progress: &'a RunProgress,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotOwned {
    #[allow(dead_code)]
    version: u32,
    saved_at: DateTime<Utc>,
    progress: RunProgress,
}

/// A snapshot read back from disk.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub saved_at: DateTime<Utc>,
    pub progress: RunProgress,
}

#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store rooted in a logs directory, using the standard snapshot name.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SNAPSHOT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Returns the persisted progress, or a fresh one when nothing is stored.
    pub fn load(&self) -> Result<RunProgress, StoreError> {
        Ok(self
            .load_snapshot()?
            .map(|s| s.progress)
            .unwrap_or_else(|| RunProgress::new(Utc::now())))
    }

    pub fn load_snapshot(&self) -> Result<Option<StoredSnapshot>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.corrupt(format!("unreadable: {e}"))),
        };

        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e.to_string()))?;
        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| self.corrupt("missing snapshot version"))?;
        if version != u64::from(SNAPSHOT_VERSION) {
            return Err(self.corrupt(format!("unsupported snapshot version {version}")));
        }
        let snapshot: SnapshotOwned =
            serde_json::from_value(value).map_err(|e| self.corrupt(e.to_string()))?;

        let progress = snapshot.progress;
        let accounted = progress.categorized() + progress.error_count;
        if accounted != progress.processed() {
            return Err(self.corrupt(format!(
                "counters ({accounted}) disagree with done-set ({})",
                progress.processed()
            )));
        }
        if progress.empty_content > progress.categorized() {
            return Err(self.corrupt(format!(
                "{} empty documents but only {} categorized",
                progress.empty_content,
                progress.categorized()
            )));
        }

        debug!(
            path = %self.path.display(),
            done = progress.processed(),
            total = progress.total,
            "loaded progress snapshot"
        );
        Ok(Some(StoredSnapshot {
            saved_at: snapshot.saved_at,
            progress,
        }))
    }

    /// Applies `outcomes` to `progress` and persists the result.
    ///
    /// Re-applying outcomes whose path is already done changes nothing, so a
    /// failed commit can simply be retried with the same batch.
    pub fn commit(
        &self,
        outcomes: &[FileOutcome],
        progress: &mut RunProgress,
    ) -> Result<usize, StoreError> {
        let added = progress.apply_all(outcomes);
        self.persist(progress)?;
        Ok(added)
    }

    /// Writes the snapshot to a temp file next to the target, syncs it and
    /// renames it over the previous snapshot.
    pub fn persist(&self, progress: &RunProgress) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;

        let json = serde_json::to_vec_pretty(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            progress,
        })?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(&json).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;

        debug!(
            path = %self.path.display(),
            done = progress.processed(),
            "persisted progress snapshot"
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;

    fn store() -> (tempfile::TempDir, ProgressStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::in_dir(&dir.path().join("logs"));
        (dir, store)
    }

    #[test]
    fn missing_snapshot_loads_fresh_progress() {
        let (_dir, store) = store();
        assert!(!store.exists());
        let progress = store.load().unwrap();
        assert!(progress.done.is_empty());
        assert_eq!(progress.total, 0);
    }

    #[test]
    fn commit_then_load_round_trips() {
        let (_dir, store) = store();
        let mut progress = RunProgress::new(Utc::now());
        progress.total = 3;
        let batch = vec![
            FileOutcome::new("/src/a.docx", Verdict::Categorized("Policy 01".into())),
            FileOutcome::new("/src/b.docx", Verdict::Unclassified),
            FileOutcome::error("/src/c.doc", "all extraction strategies failed"),
        ];
        assert_eq!(store.commit(&batch, &mut progress).unwrap(), 3);

        let loaded = store.load().unwrap();
        assert_eq!(loaded, progress);
    }

    #[test]
    fn retried_commit_does_not_double_count() {
        let (_dir, store) = store();
        let mut progress = RunProgress::new(Utc::now());
        let batch = vec![FileOutcome::new("/src/a.docx", Verdict::Unclassified)];
        store.commit(&batch, &mut progress).unwrap();
        assert_eq!(store.commit(&batch, &mut progress).unwrap(), 0);
        assert_eq!(store.load().unwrap().processed(), 1);
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), b"\x80\x04pickle").unwrap();
        let err = store.load().unwrap_err();
        assert!(err.is_corrupt(), "{err}");
    }

    #[test]
    fn unknown_version_and_fields_are_rejected() {
        let (_dir, store) = store();
        let mut progress = RunProgress::new(Utc::now());
        store.persist(&progress).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        value["version"] = serde_json::json!(2);
        fs::write(store.path(), serde_json::to_vec(&value).unwrap()).unwrap();
        assert!(store.load().unwrap_err().is_corrupt());

        progress.total = 1;
        store.persist(&progress).unwrap();
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        value["progress"]["surprise"] = serde_json::json!(true);
        fs::write(store.path(), serde_json::to_vec(&value).unwrap()).unwrap();
        assert!(store.load().unwrap_err().is_corrupt());
    }

    #[test]
    fn clear_removes_snapshot_and_tolerates_missing() {
        let (_dir, store) = store();
        store.persist(&RunProgress::new(Utc::now())).unwrap();
        assert!(store.exists());
        store.clear().unwrap();
        assert!(!store.exists());
        store.clear().unwrap();
    }
}

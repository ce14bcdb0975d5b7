//! Backing storage for the quota state
//!
//! The store talks to storage only through `QuotaStorage`, so tests and
//! embedders can swap the JSON file for an in-memory backend. Methods return
//! boxed futures so the trait stays dyn-compatible (`Arc<dyn QuotaStorage>`).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::error::{Error, Result};
use crate::state::QuotaSnapshot;

/// Boxed future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable home for one `QuotaSnapshot`.
pub trait QuotaStorage: Send + Sync {
    /// Human-readable location for logs (e.g. the file path).
    fn describe(&self) -> String;

    /// Read the stored snapshot. `Ok(None)` means nothing has been stored yet.
    /// Unparsable content is an error; the store decides how to recover.
    fn load(&self) -> StorageFuture<'_, Option<QuotaSnapshot>>;

    /// Replace the stored snapshot.
    fn save<'a>(&'a self, snapshot: &'a QuotaSnapshot) -> StorageFuture<'a, ()>;

    /// Remove the stored snapshot. Clearing empty storage is not an error.
    fn clear(&self) -> StorageFuture<'_, ()>;
}

/// JSON file storage with atomic replace-on-write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl QuotaStorage for FileStorage {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> StorageFuture<'_, Option<QuotaSnapshot>> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(Error::Storage(format!(
                        "reading {}: {e}",
                        self.path.display()
                    )));
                }
            };
            let snapshot = serde_json::from_str(&contents).map_err(|e| {
                Error::Storage(format!("parsing {}: {e}", self.path.display()))
            })?;
            Ok(Some(snapshot))
        })
    }

    fn save<'a>(&'a self, snapshot: &'a QuotaSnapshot) -> StorageFuture<'a, ()> {
        Box::pin(write_atomic(&self.path, snapshot))
    }

    fn clear(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "removed quota state file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Storage(format!(
                    "removing {}: {e}",
                    self.path.display()
                ))),
            }
        })
    }
}

/// Write the snapshot to `path` atomically.
///
/// Writes a temp file next to the target, then renames it over the target, so
/// a crash or a concurrent reader never observes a half-written file. Missing
/// parent directories are created.
async fn write_atomic(path: &Path, snapshot: &QuotaSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| Error::Storage(format!("serializing quota state: {e}")))?;

    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Storage(format!("creating {}: {e}", dir.display())))?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Storage(format!("{} has no file name", path.display())))?
        .to_string_lossy();
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing {}: {e}", tmp_path.display())))?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming {}: {e}", tmp_path.display())))?;

    debug!(path = %path.display(), entries = snapshot.exhausted.len(), "persisted quota state");
    Ok(())
}

/// In-process storage, mainly for tests.
///
/// Counts calls so tests can assert when (and whether) storage was touched.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    snapshot: Mutex<Option<QuotaSnapshot>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that already holds `snapshot`, as if written by an earlier process.
    pub fn with_snapshot(snapshot: QuotaSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Currently stored snapshot.
    pub fn current(&self) -> Option<QuotaSnapshot> {
        self.lock().clone()
    }

    /// Overwrite the stored snapshot without counting a save (simulates
    /// another process writing the same store).
    pub fn put(&self, snapshot: QuotaSnapshot) {
        *self.lock() = Some(snapshot);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<QuotaSnapshot>> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl QuotaStorage for MemoryStorage {
    fn describe(&self) -> String {
        "memory".into()
    }

    fn load(&self) -> StorageFuture<'_, Option<QuotaSnapshot>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.current();
        Box::pin(async move { Ok(snapshot) })
    }

    fn save<'a>(&'a self, snapshot: &'a QuotaSnapshot) -> StorageFuture<'a, ()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        *self.lock() = Some(snapshot.clone());
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> StorageFuture<'_, ()> {
        *self.lock() = None;
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn snapshot() -> QuotaSnapshot {
        QuotaSnapshot {
            date: NaiveDate::from_ymd_opt(2026, 2, 14).unwrap(),
            exhausted: vec![(0, "model-a".into()), (1, "model-a".into())],
        }
    }

    #[tokio::test]
    async fn file_roundtrip_uses_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota_state.json");
        let storage = FileStorage::new(&path);

        storage.save(&snapshot()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "date": "2026-02-14",
                "exhausted": [[0, "model-a"], [1, "model-a"]]
            })
        );

        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot());
    }

    #[tokio::test]
    async fn file_missing_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("absent.json"));
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_corrupt_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota_state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileStorage::new(&path).load().await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nested").join("quota_state.json");
        FileStorage::new(&path).save(&snapshot()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota_state.json");
        let storage = FileStorage::new(&path);
        storage.save(&snapshot()).await.unwrap();
        storage.save(&snapshot()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["quota_state.json"]);
    }

    #[tokio::test]
    async fn clear_removes_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota_state.json");
        let storage = FileStorage::new(&path);
        storage.save(&snapshot()).await.unwrap();

        storage.clear().await.unwrap();
        assert!(!path.exists());
        storage.clear().await.unwrap();
    }

    #[tokio::test]
    async fn memory_storage_counts_calls() {
        let storage = MemoryStorage::new();
        assert!(storage.load().await.unwrap().is_none());
        storage.save(&snapshot()).await.unwrap();
        assert_eq!(storage.load().await.unwrap(), Some(snapshot()));
        assert_eq!(storage.load_count(), 2);
        assert_eq!(storage.save_count(), 1);

        storage.clear().await.unwrap();
        assert!(storage.current().is_none());
    }
}

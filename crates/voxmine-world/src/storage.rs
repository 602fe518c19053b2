//! Durable backends for world-delta records.
//!
//! A backend stores opaque byte blobs under short string keys, one per
//! room. The [`DeltaStore`](crate::DeltaStore) decides what goes in the blob.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::StorageError;

/// A key-value backend for persisted world deltas.
///
/// Both methods return `Send` futures so a room actor spawned on the
/// multi-threaded runtime can await them.
pub trait DeltaStorage: Send + Sync + 'static {
    /// Loads the record stored under `key`, or `None` if there is none.
    fn load(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, StorageError>> + Send;

    /// Replaces the record under `key`. A reader must never observe a
    /// partially written record.
    fn save(
        &self,
        key: &str,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

fn check_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// Stores each record as `<dir>/<key>.json`.
///
/// Saves write `<key>.json.tmp` first and rename it over the target, so a
/// crash mid-write leaves the previous record intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Creates a backend rooted at `dir`. The directory is created lazily
    /// on the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl DeltaStorage for FileStorage {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        check_key(key)?;
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        check_key(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;

        tracing::trace!(path = %target.display(), len = bytes.len(), "world delta written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// In-process backend. Used by tests and by servers that do not need
/// deltas to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, Vec<u8>>>,
    fail_saves: AtomicBool,
    failing_loads: AtomicU32,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save` fail until switched back off.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` loads fail.
    pub fn fail_next_loads(&self, count: u32) {
        self.failing_loads.store(count, Ordering::SeqCst);
    }

    /// Returns a copy of the raw record under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    /// Stores a raw record directly, bypassing the failure switch.
    pub fn insert(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.lock().insert(key.to_string(), bytes.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DeltaStorage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let failed = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StorageError::Unavailable(format!("load of {key} refused")));
        }
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("save of {key} refused")));
        }
        self.insert(key, bytes);
        Ok(())
    }
}

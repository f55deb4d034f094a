//! Snapshot cache contract and implementations.
//!
//! The cache holds the last known snippet list under a namespace key so a
//! restarted process can show stale-but-valid content before the first load
//! completes. Cache failures never affect correctness; the coordinator logs
//! and moves on.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;
use snipsync_protocol::Snippet;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Persists and retrieves snippet-list snapshots.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Stores a snapshot under the given key, replacing any previous one.
    async fn save(&self, key: &str, snippets: &[Snippet]) -> SyncResult<()>;

    /// Loads the snapshot stored under the given key, if any.
    async fn load(&self, key: &str) -> SyncResult<Option<Vec<Snippet>>>;
}

/// An in-memory cache store for tests.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Vec<Snippet>>>,
    fail: AtomicBool,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with one snapshot.
    pub fn seeded(key: impl Into<String>, snippets: Vec<Snippet>) -> Self {
        let store = Self::new();
        store.entries.write().insert(key.into(), snippets);
        store
    }

    /// Makes every subsequent operation fail. Used to verify the coordinator
    /// swallows cache failures.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns the snapshot currently stored under the key.
    pub fn snapshot(&self, key: &str) -> Option<Vec<Snippet>> {
        self.entries.read().get(key).cloned()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn save(&self, key: &str, snippets: &[Snippet]) -> SyncResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Cache("memory store failing".into()));
        }
        self.entries.write().insert(key.into(), snippets.to_vec());
        Ok(())
    }

    async fn load(&self, key: &str) -> SyncResult<Option<Vec<Snippet>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Cache("memory store failing".into()));
        }
        Ok(self.entries.read().get(key).cloned())
    }
}

/// A file-backed cache store.
///
/// Each key maps to one JSON snapshot file inside the store directory. Writes
/// take an exclusive advisory lock and go through a temp file + rename so a
/// crashed writer never leaves a torn snapshot behind.
#[derive(Debug)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Creates a store rooted at the given directory (created if missing).
    pub fn new(dir: impl Into<PathBuf>) -> SyncResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| SyncError::Cache(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are namespace-scoped strings like "snipsync/checkout"; flatten
        // the separator so every key stays inside the store directory.
        let name: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn save(&self, key: &str, snippets: &[Snippet]) -> SyncResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let bytes =
            serde_json::to_vec(snippets).map_err(|e| SyncError::Cache(e.to_string()))?;

        let mut file =
            std::fs::File::create(&tmp).map_err(|e| SyncError::Cache(e.to_string()))?;
        file.lock_exclusive()
            .map_err(|e| SyncError::Cache(e.to_string()))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| SyncError::Cache(e.to_string()))?;
        let _ = file.unlock();
        drop(file);

        std::fs::rename(&tmp, &path).map_err(|e| SyncError::Cache(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, key: &str) -> SyncResult<Option<Vec<Snippet>>> {
        let path = self.path_for(key);
        let mut file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::Cache(e.to_string())),
        };
        file.lock_shared()
            .map_err(|e| SyncError::Cache(e.to_string()))?;
        let mut bytes = Vec::new();
        let read = file.read_to_end(&mut bytes);
        let _ = file.unlock();
        read.map_err(|e| SyncError::Cache(e.to_string()))?;

        let snippets =
            serde_json::from_slice(&bytes).map_err(|e| SyncError::Cache(e.to_string()))?;
        Ok(Some(snippets))
    }
}

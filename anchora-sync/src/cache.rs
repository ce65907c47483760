//! Persistent identity mapping between local anchors and remote tasks
//!
//! The whole cache is one record: anchor → remote reference plus per-list
//! delta cursors. It is saved through a repository trait so the storage
//! medium is swappable and corruption handling is testable without the real
//! filesystem. A cache that fails to load is treated as empty, which forces
//! a full resync; it is never fatal.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, SyncError};

/// Format version of the persisted record; unknown versions load as empty
pub const CACHE_VERSION: u32 = 1;

/// Cached mapping from one anchor to its remote task identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRef {
    pub list_id: String,
    pub task_id: String,
    pub linked_resource_id: Option<String>,
    /// Semantic hash of the local task at the last successful sync
    pub hash: String,
    /// Remote last-modified marker observed at the last successful sync
    pub synced_at: DateTime<Utc>,
}

/// Delta bookkeeping for one remote list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListCursor {
    /// Absent means the next fetch is a full enumeration
    pub cursor: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// The single persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCache {
    pub version: u32,
    pub refs: HashMap<String, RemoteRef>,
    pub cursors: HashMap<String, ListCursor>,
}

impl Default for SyncCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            refs: HashMap::new(),
            cursors: HashMap::new(),
        }
    }
}

/// Storage for the persisted cache record
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self) -> Result<Option<SyncCache>>;
    async fn save(&self, cache: &SyncCache) -> Result<()>;
}

/// JSON-file cache store, written atomically via temp file + rename
pub struct JsonCacheStore {
    path: PathBuf,
}

impl JsonCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CacheStore for JsonCacheStore {
    async fn load(&self) -> Result<Option<SyncCache>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::Io(e)),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn save(&self, cache: &SyncCache) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(cache)?;
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), refs = cache.refs.len(), "saved sync cache");
        Ok(())
    }
}

/// In-memory cache store (for testing)
#[derive(Default)]
pub struct MemoryCacheStore {
    inner: RwLock<Option<SyncCache>>,
    fail_saves: std::sync::atomic::AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every save fail until cleared
    pub fn set_fail_saves(&self, on: bool) {
        self.fail_saves
            .store(on, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Option<SyncCache> {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load(&self) -> Result<Option<SyncCache>> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, cache: &SyncCache) -> Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "scripted save failure",
            )));
        }
        *self.inner.write().await = Some(cache.clone());
        Ok(())
    }
}

/// Single-writer owner of the sync cache.
///
/// Every mutation persists immediately; a failed save is logged, flagged,
/// and retried on the next mutation or [`flush`](IdentityStore::flush).
pub struct IdentityStore {
    cache: SyncCache,
    store: Arc<dyn CacheStore>,
    dirty: bool,
}

impl IdentityStore {
    /// Load the cache, falling back to empty on any failure
    pub async fn load(store: Arc<dyn CacheStore>) -> Self {
        let cache = match store.load().await {
            Ok(Some(cache)) if cache.version == CACHE_VERSION => cache,
            Ok(Some(cache)) => {
                warn!(
                    version = cache.version,
                    "unknown sync cache version, starting from empty"
                );
                SyncCache::default()
            }
            Ok(None) => SyncCache::default(),
            Err(e) => {
                warn!("sync cache unreadable, starting from empty: {}", e);
                SyncCache::default()
            }
        };
        info!(
            refs = cache.refs.len(),
            cursors = cache.cursors.len(),
            "sync cache loaded"
        );
        Self {
            cache,
            store,
            dirty: false,
        }
    }

    pub fn get(&self, anchor_id: &str) -> Option<&RemoteRef> {
        self.cache.refs.get(anchor_id)
    }

    /// Reverse lookup by remote identity
    pub fn find_by_task(&self, list_id: &str, task_id: &str) -> Option<(&str, &RemoteRef)> {
        self.cache
            .refs
            .iter()
            .find(|(_, r)| r.list_id == list_id && r.task_id == task_id)
            .map(|(anchor, r)| (anchor.as_str(), r))
    }

    pub fn refs_for_list(&self, list_id: &str) -> Vec<(String, RemoteRef)> {
        self.cache
            .refs
            .iter()
            .filter(|(_, r)| r.list_id == list_id)
            .map(|(anchor, r)| (anchor.clone(), r.clone()))
            .collect()
    }

    pub fn ref_count(&self) -> usize {
        self.cache.refs.len()
    }

    /// Upsert one anchor's remote reference.
    ///
    /// A stale ref for the same (list, task) pair under a different anchor
    /// is evicted so the pair stays unique across the cache.
    pub async fn put(&mut self, anchor_id: &str, new_ref: RemoteRef) {
        let colliding: Vec<String> = self
            .cache
            .refs
            .iter()
            .filter(|(anchor, r)| {
                anchor.as_str() != anchor_id
                    && r.list_id == new_ref.list_id
                    && r.task_id == new_ref.task_id
            })
            .map(|(anchor, _)| anchor.clone())
            .collect();
        for anchor in colliding {
            warn!(
                old_anchor = %anchor,
                new_anchor = anchor_id,
                task = %new_ref.task_id,
                "evicting stale ref for remapped remote task"
            );
            self.cache.refs.remove(&anchor);
        }
        self.cache.refs.insert(anchor_id.to_string(), new_ref);
        self.persist().await;
    }

    pub async fn remove(&mut self, anchor_id: &str) -> bool {
        let removed = self.cache.refs.remove(anchor_id).is_some();
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Drop refs whose anchor no longer exists locally. The remote side is
    /// untouched; this only forgets the mapping.
    pub async fn remove_stale(&mut self, live_anchor_ids: &HashSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .cache
            .refs
            .keys()
            .filter(|anchor| !live_anchor_ids.contains(*anchor))
            .cloned()
            .collect();
        for anchor in &stale {
            debug!(anchor = %anchor, "removing stale cache entry");
            self.cache.refs.remove(anchor);
        }
        if !stale.is_empty() {
            self.persist().await;
        }
        stale
    }

    pub fn cursor(&self, list_id: &str) -> Option<&str> {
        self.cache
            .cursors
            .get(list_id)
            .and_then(|c| c.cursor.as_deref())
    }

    pub fn last_synced_at(&self, list_id: &str) -> Option<DateTime<Utc>> {
        self.cache
            .cursors
            .get(list_id)
            .and_then(|c| c.last_synced_at)
    }

    /// Record the cursor produced by a successful fetch
    pub async fn set_cursor(&mut self, list_id: &str, cursor: Option<String>) {
        let entry = self.cache.cursors.entry(list_id.to_string()).or_default();
        entry.cursor = cursor;
        entry.last_synced_at = Some(Utc::now());
        self.persist().await;
    }

    /// Forget a cursor the service rejected; the next fetch is full
    pub async fn clear_cursor(&mut self, list_id: &str) {
        if let Some(entry) = self.cache.cursors.get_mut(list_id) {
            entry.cursor = None;
            self.persist().await;
        }
    }

    /// Clear everything, forcing the next sync to fully refetch and
    /// re-reconcile every list
    pub async fn reset_all(&mut self) {
        info!("resetting sync cache");
        self.cache = SyncCache::default();
        self.persist().await;
    }

    /// Retry a previously failed save, if any
    pub async fn flush(&mut self) {
        if self.dirty {
            self.persist().await;
        }
    }

    async fn persist(&mut self) {
        match self.store.save(&self.cache).await {
            Ok(()) => self.dirty = false,
            Err(e) => {
                error!("failed to persist sync cache, will retry on next change: {}", e);
                self.dirty = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_ref(list: &str, task: &str) -> RemoteRef {
        RemoteRef {
            list_id: list.to_string(),
            task_id: task.to_string(),
            linked_resource_id: Some(format!("lr-{}", task)),
            hash: "h1".to_string(),
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("sync-cache.json");
        let store = Arc::new(JsonCacheStore::new(&path));

        let mut identity = IdentityStore::load(store.clone()).await;
        identity.put("abc123", sample_ref("L1", "T1")).await;
        identity.set_cursor("L1", Some("c42".to_string())).await;

        let reloaded = IdentityStore::load(store).await;
        assert_eq!(reloaded.get("abc123").unwrap().task_id, "T1");
        assert_eq!(reloaded.cursor("L1"), Some("c42"));
        assert!(reloaded.last_synced_at("L1").is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync-cache.json");
        tokio::fs::write(&path, b"{ not json ").await.unwrap();

        let identity = IdentityStore::load(Arc::new(JsonCacheStore::new(&path))).await;
        assert_eq!(identity.ref_count(), 0);
        assert_eq!(identity.cursor("L1"), None);
    }

    #[tokio::test]
    async fn test_unknown_version_loads_as_empty() {
        let store = Arc::new(MemoryCacheStore::new());
        let mut wrong = SyncCache::default();
        wrong.version = 99;
        wrong.refs.insert("a".to_string(), sample_ref("L1", "T1"));
        store.save(&wrong).await.unwrap();

        // Version check happens on load, not save.
        let loaded = IdentityStore::load(store).await;
        assert_eq!(loaded.ref_count(), 0);
    }

    #[tokio::test]
    async fn test_put_evicts_colliding_task_pair() {
        let store = Arc::new(MemoryCacheStore::new());
        let mut identity = IdentityStore::load(store).await;

        identity.put("old", sample_ref("L1", "T1")).await;
        identity.put("new", sample_ref("L1", "T1")).await;

        assert!(identity.get("old").is_none());
        assert_eq!(identity.find_by_task("L1", "T1").unwrap().0, "new");
        assert_eq!(identity.ref_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_stale_keeps_live_anchors() {
        let store = Arc::new(MemoryCacheStore::new());
        let mut identity = IdentityStore::load(store).await;
        identity.put("keep", sample_ref("L1", "T1")).await;
        identity.put("drop", sample_ref("L1", "T2")).await;

        let live: HashSet<String> = ["keep".to_string()].into_iter().collect();
        let removed = identity.remove_stale(&live).await;

        assert_eq!(removed, vec!["drop".to_string()]);
        assert!(identity.get("keep").is_some());
        assert!(identity.get("drop").is_none());
    }

    #[tokio::test]
    async fn test_failed_save_retries_on_next_mutation() {
        let store = Arc::new(MemoryCacheStore::new());
        let mut identity = IdentityStore::load(store.clone()).await;

        store.set_fail_saves(true);
        identity.put("abc", sample_ref("L1", "T1")).await;
        assert!(store.snapshot().await.is_none());

        store.set_fail_saves(false);
        identity.set_cursor("L1", Some("c1".to_string())).await;

        let persisted = store.snapshot().await.unwrap();
        assert!(persisted.refs.contains_key("abc"));
    }

    #[tokio::test]
    async fn test_reset_all_clears_refs_and_cursors() {
        let store = Arc::new(MemoryCacheStore::new());
        let mut identity = IdentityStore::load(store).await;
        identity.put("abc", sample_ref("L1", "T1")).await;
        identity.set_cursor("L1", Some("c1".to_string())).await;

        identity.reset_all().await;

        assert_eq!(identity.ref_count(), 0);
        assert_eq!(identity.cursor("L1"), None);
    }
}

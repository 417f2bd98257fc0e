//! Persistent cache with in-memory fallback
//!
//! ```text
//!   open ──> integrity check ──ok──> Persistent ──close──> Closed
//!               │ fail                                       ^
//!               v                                            │
//!        delete files, reopen ──ok──> Persistent             │
//!               │ fail                                       │
//!               v                                            │
//!            Fallback ───────────────────close───────────────┘
//! ```
//!
//! The mode is decided once, when the cache is opened. Every public
//! operation is infallible: storage errors are logged and surface as a
//! miss or a no-op.

use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::key::{CacheKey, InvalidateScope};
use crate::memory::MemoryStore;
use crate::store::{remove_files, CacheStore};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Upper bound on the store file size
    pub map_size: usize,
    /// How long a writer waits for its turn before the write is dropped
    pub lock_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Observable state of a [`PersistentCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Persistent,
    Fallback,
    Closed,
}

enum CacheState {
    Persistent(CacheStore),
    Fallback(MemoryStore),
    Closed,
}

impl CacheState {
    fn mode(&self) -> CacheMode {
        match self {
            CacheState::Persistent(_) => CacheMode::Persistent,
            CacheState::Fallback(_) => CacheMode::Fallback,
            CacheState::Closed => CacheMode::Closed,
        }
    }
}

pub struct PersistentCache {
    path: Option<PathBuf>,
    state: RwLock<CacheState>,
    writer: Mutex<()>,
    options: CacheOptions,
}

impl PersistentCache {
    /// Open the durable store at `path`, rebuilding it once if it is
    /// unreadable and falling back to memory if that fails too.
    pub fn open<P: AsRef<Path>>(path: P, options: CacheOptions) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match initialize(&path, &options) {
            Ok(store) => {
                debug!("Opened result cache at {}", path.display());
                CacheState::Persistent(store)
            }
            Err(e) => {
                warn!("Result cache entering fallback mode: {}", e);
                CacheState::Fallback(MemoryStore::new())
            }
        };
        Self {
            path: Some(path),
            state: RwLock::new(state),
            writer: Mutex::new(()),
            options,
        }
    }

    /// A cache that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(CacheState::Fallback(MemoryStore::new())),
            writer: Mutex::new(()),
            options: CacheOptions::default(),
        }
    }

    /// A cache that is already closed
    pub fn closed() -> Self {
        Self {
            path: None,
            state: RwLock::new(CacheState::Closed),
            writer: Mutex::new(()),
            options: CacheOptions::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> CacheMode {
        self.state.read().mode()
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let encoded = key.encode();
        match &*self.state.read() {
            CacheState::Persistent(store) => match store.get(key.table(), &encoded) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Ignoring unreadable cache entry for widget '{}': {:#}", key.widget(), e);
                    None
                }
            },
            CacheState::Fallback(memory) => memory.get(key.table(), &encoded),
            CacheState::Closed => None,
        }
    }

    /// Insert or replace, stamped with the current time
    pub fn set(&self, key: &CacheKey, value: &Value) {
        self.set_at(key, value, Utc::now());
    }

    pub fn set_at(&self, key: &CacheKey, value: &Value, computed_at: DateTime<Utc>) {
        if let Err(e) = self.try_set(key, CacheEntry::new(value.clone(), computed_at)) {
            warn!("Cache write for widget '{}' dropped: {}", key.widget(), e);
        }
    }

    fn try_set(&self, key: &CacheKey, entry: CacheEntry) -> Result<()> {
        let state = self.state.read();
        if matches!(*state, CacheState::Closed) {
            return Ok(());
        }
        let _writer = self
            .writer
            .try_lock_for(self.options.lock_timeout)
            .ok_or(CacheError::LockTimeout(self.options.lock_timeout))?;
        match &*state {
            CacheState::Persistent(store) => store.put(key.table(), &key.encode(), &entry)?,
            CacheState::Fallback(memory) => memory.put(key.table(), &key.encode(), entry),
            CacheState::Closed => {}
        }
        Ok(())
    }

    /// Remove every entry in `scope`; returns how many were removed
    pub fn invalidate(&self, scope: &InvalidateScope) -> usize {
        match self.try_invalidate(scope) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Cache invalidation {:?} failed: {}", scope, e);
                0
            }
        }
    }

    fn try_invalidate(&self, scope: &InvalidateScope) -> Result<usize> {
        let state = self.state.read();
        if matches!(*state, CacheState::Closed) {
            return Ok(0);
        }
        let _writer = self
            .writer
            .try_lock_for(self.options.lock_timeout)
            .ok_or(CacheError::LockTimeout(self.options.lock_timeout))?;
        Ok(match &*state {
            CacheState::Persistent(store) => store.invalidate(scope)?,
            CacheState::Fallback(memory) => memory.invalidate(scope),
            CacheState::Closed => 0,
        })
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        match &*self.state.read() {
            CacheState::Persistent(store) => store.len().unwrap_or_else(|e| {
                warn!("Cache entry count unavailable: {:#}", e);
                0
            }),
            CacheState::Fallback(memory) => memory.len(),
            CacheState::Closed => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the store. Safe to call any number of times.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), CacheState::Closed);
        if let CacheState::Persistent(store) = previous {
            debug!("Closing result cache at {}", store.path().display());
            store.close();
        }
    }
}

impl Drop for PersistentCache {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("path", &self.path)
            .field("mode", &self.mode())
            .finish()
    }
}

fn initialize(path: &Path, options: &CacheOptions) -> Result<CacheStore> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| CacheError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    match open_checked(path, options) {
        Ok(store) => Ok(store),
        Err(e) => {
            warn!("Rebuilding result cache at {}: {}", path.display(), e);
            remove_files(path).map_err(|e| CacheError::Open {
                path: path.to_path_buf(),
                reason: format!("could not delete damaged store: {}", e),
            })?;
            open_checked(path, options)
        }
    }
}

fn open_checked(path: &Path, options: &CacheOptions) -> Result<CacheStore> {
    let store = CacheStore::open(path, options.map_size).map_err(|e| CacheError::Open {
        path: path.to_path_buf(),
        reason: format!("{:#}", e),
    })?;
    if let Err(e) = store.integrity_check() {
        store.close();
        return Err(CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("{:#}", e),
        });
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Table;
    use serde_json::json;
    use tempfile::TempDir;

    fn options() -> CacheOptions {
        CacheOptions {
            map_size: 16 * 1024 * 1024,
            lock_timeout: Duration::from_millis(200),
        }
    }

    fn exercise(cache: &PersistentCache) {
        let a = CacheKey::aggregate("v", "ratings", "h1");
        let b = CacheKey::aggregate("v", "ratings", "h2");
        let s = CacheKey::similarity("v", "related", "a.md", "1");

        assert!(cache.get(&a).is_none());
        cache.set(&a, &json!({"avg": 7}));
        cache.set(&a, &json!({"avg": 8}));
        cache.set(&b, &json!({"avg": 1}));
        cache.set(&s, &json!([{"id": "b.md", "score": 0.5}]));

        assert_eq!(cache.get(&a).unwrap().value, json!({"avg": 8}));
        assert_eq!(cache.len(), 3);

        let scope = InvalidateScope::VaultWidget {
            vault: "v".to_string(),
            widget: "ratings".to_string(),
        };
        assert_eq!(cache.invalidate(&scope), 2);
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&s).is_some());
        assert_eq!(cache.invalidate(&InvalidateScope::Vault("v".to_string())), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_persistent_mode() {
        let dir = TempDir::new().unwrap();
        let cache = PersistentCache::open(dir.path().join("v.lmdb"), options());
        assert_eq!(cache.mode(), CacheMode::Persistent);
        exercise(&cache);
    }

    #[test]
    fn test_fallback_behaves_like_persistent() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let cache = PersistentCache::open(blocker.join("v.lmdb"), options());
        assert_eq!(cache.mode(), CacheMode::Fallback);
        exercise(&cache);

        let cache = PersistentCache::in_memory();
        assert_eq!(cache.mode(), CacheMode::Fallback);
        exercise(&cache);
    }

    #[test]
    fn test_long_vault_and_widget_names_store_on_disk() {
        let dir = TempDir::new().unwrap();
        let cache = PersistentCache::open(dir.path().join("v.lmdb"), options());
        assert_eq!(cache.mode(), CacheMode::Persistent);

        let vault = "vault-".repeat(100);
        let widget = "widget-".repeat(100);
        let key = CacheKey::aggregate(&vault, &widget, "h");
        let sibling = CacheKey::aggregate(&vault, "short", "h");
        cache.set(&key, &json!({"n": 1}));
        cache.set(&sibling, &json!({"n": 2}));
        assert_eq!(cache.get(&key).unwrap().value, json!({"n": 1}));

        let scope = InvalidateScope::VaultWidget {
            vault: vault.clone(),
            widget,
        };
        assert_eq!(cache.invalidate(&scope), 1);
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.invalidate(&InvalidateScope::Vault(vault)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entries_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.lmdb");
        let key = CacheKey::aggregate("v", "w", "h");

        let computed_at = Utc::now();
        let cache = PersistentCache::open(&path, options());
        cache.set_at(&key, &json!(42), computed_at);
        cache.close();

        let cache = PersistentCache::open(&path, options());
        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.value, json!(42));
        assert_eq!(entry.computed_at, computed_at);
    }

    #[test]
    fn test_unreadable_file_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.lmdb");
        std::fs::write(&path, vec![0xAB; 64 * 1024]).unwrap();

        let cache = PersistentCache::open(&path, options());
        assert_eq!(cache.mode(), CacheMode::Persistent);
        assert!(cache.is_empty());
        exercise(&cache);
    }

    #[test]
    fn test_corrupt_record_triggers_rebuild() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.lmdb");
        let good = CacheKey::aggregate("v", "w", "h");

        let store = CacheStore::open(&path, options().map_size).unwrap();
        store
            .put(good.table(), &good.encode(), &CacheEntry::new(json!(1), Utc::now()))
            .unwrap();
        store.put_raw(Table::Similar, "broken", b"\x00\x01").unwrap();
        store.close();

        let cache = PersistentCache::open(&path, options());
        assert_eq!(cache.mode(), CacheMode::Persistent);
        assert!(cache.is_empty());
        assert!(cache.get(&good).is_none());
    }

    #[test]
    fn test_close_is_idempotent_and_quiet() {
        let dir = TempDir::new().unwrap();
        let cache = PersistentCache::open(dir.path().join("v.lmdb"), options());
        let key = CacheKey::aggregate("v", "w", "h");
        cache.set(&key, &json!(1));

        cache.close();
        cache.close();
        assert_eq!(cache.mode(), CacheMode::Closed);
        assert!(cache.get(&key).is_none());
        cache.set(&key, &json!(2));
        assert_eq!(cache.invalidate(&InvalidateScope::Vault("v".to_string())), 0);
        assert_eq!(cache.len(), 0);

        let memory = PersistentCache::in_memory();
        memory.close();
        assert_eq!(memory.mode(), CacheMode::Closed);
        assert_eq!(PersistentCache::closed().mode(), CacheMode::Closed);
    }

    #[test]
    fn test_contended_writer_gives_up() {
        let mut cache = PersistentCache::in_memory();
        cache.options.lock_timeout = Duration::from_millis(20);
        let key = CacheKey::aggregate("v", "w", "h");
        let held = cache.writer.lock();
        cache.set(&key, &json!(1));
        drop(held);
        assert!(cache.get(&key).is_none());
    }
}

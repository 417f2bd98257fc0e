use crate::cache::{CacheMode, CacheOptions, PersistentCache};
use crate::entry::CacheEntry;
use crate::key::{CacheKey, InvalidateScope};
use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

const MAX_STEM_LEN: usize = 64;

/// Owns one [`PersistentCache`] per collection, opened on first use.
///
/// Without a cache directory every collection gets an in-memory cache.
pub struct CacheManager {
    dir: Option<PathBuf>,
    options: CacheOptions,
    caches: RwLock<HashMap<String, Arc<PersistentCache>>>,
    closed: AtomicBool,
}

impl CacheManager {
    pub fn new(dir: Option<PathBuf>, options: CacheOptions) -> Self {
        Self {
            dir,
            options,
            caches: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None, CacheOptions::default())
    }

    #[inline]
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Where a collection's store file lives
    pub fn store_path(&self, vault: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(store_file_name(vault)))
    }

    /// The cache for `vault`, opening it if needed
    pub fn cache_for(&self, vault: &str) -> Arc<PersistentCache> {
        if self.closed.load(Ordering::Acquire) {
            return Arc::new(PersistentCache::closed());
        }
        if let Some(cache) = self.caches.read().get(vault) {
            return cache.clone();
        }

        let mut caches = self.caches.write();
        caches
            .entry(vault.to_string())
            .or_insert_with(|| {
                let cache = match self.store_path(vault) {
                    Some(path) => PersistentCache::open(path, self.options.clone()),
                    None => PersistentCache::in_memory(),
                };
                debug!("Cache for collection '{}' opened in {:?} mode", vault, cache.mode());
                Arc::new(cache)
            })
            .clone()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.cache_for(key.vault()).get(key)
    }

    pub fn set(&self, key: &CacheKey, value: &Value) {
        self.cache_for(key.vault()).set(key, value);
    }

    /// Remove every entry in `scope`. A collection-wide scope opens that
    /// collection's cache; `Widget` only reaches caches already open.
    pub fn invalidate(&self, scope: &InvalidateScope) -> usize {
        match scope.vault() {
            Some(vault) => self.cache_for(vault).invalidate(scope),
            None => {
                let caches: Vec<Arc<PersistentCache>> = self.caches.read().values().cloned().collect();
                caches.iter().map(|cache| cache.invalidate(scope)).sum()
            }
        }
    }

    pub fn mode(&self, vault: &str) -> CacheMode {
        self.cache_for(vault).mode()
    }

    /// Ids of the collections with an open cache
    pub fn open_vaults(&self) -> Vec<String> {
        let mut vaults: Vec<String> = self.caches.read().keys().cloned().collect();
        vaults.sort();
        vaults
    }

    /// Close every cache. Later calls see closed caches.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let caches: Vec<Arc<PersistentCache>> = self.caches.write().drain().map(|(_, c)| c).collect();
        for cache in caches {
            cache.close();
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("dir", &self.dir)
            .field("open_vaults", &self.open_vaults())
            .finish()
    }
}

/// `<sanitized id>-<hash>.lmdb`; the hash keeps ids that sanitize alike apart
pub fn store_file_name(vault: &str) -> String {
    let stem: String = vault
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();
    let digest = format!("{:x}", Sha256::digest(vault.as_bytes()));
    format!("{}-{}.lmdb", stem, &digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn options() -> CacheOptions {
        CacheOptions {
            map_size: 16 * 1024 * 1024,
            lock_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_store_file_names() {
        let a = store_file_name("My Vault/notes");
        assert!(a.starts_with("My_Vault_notes-"));
        assert!(a.ends_with(".lmdb"));
        assert_ne!(store_file_name("a/b"), store_file_name("a_b"));
        assert!(store_file_name(&"x".repeat(500)).len() < 100);
    }

    #[test]
    fn test_one_store_per_vault() {
        let dir = TempDir::new().unwrap();
        let manager = CacheManager::new(Some(dir.path().to_path_buf()), options());

        manager.set(&CacheKey::aggregate("one", "w", "h"), &json!(1));
        manager.set(&CacheKey::aggregate("two", "w", "h"), &json!(2));

        assert!(Arc::ptr_eq(&manager.cache_for("one"), &manager.cache_for("one")));
        assert_eq!(manager.mode("one"), CacheMode::Persistent);
        assert!(manager.store_path("one").unwrap().exists());
        assert!(manager.store_path("two").unwrap().exists());
        assert_eq!(manager.open_vaults(), vec!["one", "two"]);
        assert_eq!(manager.get(&CacheKey::aggregate("two", "w", "h")).unwrap().value, json!(2));
    }

    #[test]
    fn test_invalidate_scopes() {
        let manager = CacheManager::in_memory();
        for vault in ["one", "two"] {
            for widget in ["w", "x"] {
                manager.set(&CacheKey::aggregate(vault, widget, "h"), &json!(0));
            }
        }

        assert_eq!(manager.invalidate(&InvalidateScope::Widget("w".to_string())), 2);
        let scope = InvalidateScope::VaultWidget {
            vault: "one".to_string(),
            widget: "x".to_string(),
        };
        assert_eq!(manager.invalidate(&scope), 1);
        assert_eq!(manager.invalidate(&InvalidateScope::Vault("two".to_string())), 1);
        assert!(manager.get(&CacheKey::aggregate("two", "x", "h")).is_none());
    }

    #[test]
    fn test_close_then_use() {
        let dir = TempDir::new().unwrap();
        let manager = CacheManager::new(Some(dir.path().to_path_buf()), options());
        let key = CacheKey::aggregate("v", "w", "h");
        manager.set(&key, &json!(1));

        manager.close();
        manager.close();
        assert_eq!(manager.mode("v"), CacheMode::Closed);
        assert!(manager.get(&key).is_none());
        manager.set(&key, &json!(2));
        assert!(manager.open_vaults().is_empty());
    }
}

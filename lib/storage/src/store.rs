// LMDB-backed durable store for cached widget results
use crate::entry::{CacheEntry, StoredEntry};
use crate::key::{InvalidateScope, Table};
use anyhow::{anyhow, Result};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use std::path::{Path, PathBuf};

const DB_AGGREGATES: &str = "aggregates";
const DB_SIMILAR: &str = "similar";

/// Map sizes are rounded up to this so they are a multiple of any page size
const MAP_ALIGN: usize = 64 * 1024;

type EntryDb = Database<Str, Bytes>;

/// One collection's durable cache file.
///
/// LMDB commits are copy-on-write and synced, so a crash leaves either the
/// old or the new version of a record, never a torn one. LMDB itself
/// allows one writer at a time and never blocks readers.
pub struct CacheStore {
    env: Env,
    aggregates_db: EntryDb,
    similar_db: EntryDb,
    path: PathBuf,
}

impl CacheStore {
    /// Open (or create) the store file at `path` and ensure both tables exist
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map_size = map_size.max(MAP_ALIGN).div_ceil(MAP_ALIGN) * MAP_ALIGN;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(2)
                .flags(EnvFlags::NO_SUB_DIR)
                .open(&path)?
        };

        let mut wtxn = env.write_txn()?;
        let aggregates_db = env.create_database(&mut wtxn, Some(DB_AGGREGATES))?;
        let similar_db = env.create_database(&mut wtxn, Some(DB_SIMILAR))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            aggregates_db,
            similar_db,
            path,
        })
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db(&self, table: Table) -> &EntryDb {
        match table {
            Table::Aggregates => &self.aggregates_db,
            Table::Similar => &self.similar_db,
        }
    }

    /// Every record must decode and match its checksum
    pub fn integrity_check(&self) -> Result<()> {
        let rtxn = self.env.read_txn()?;
        for (name, db) in [(DB_AGGREGATES, &self.aggregates_db), (DB_SIMILAR, &self.similar_db)] {
            for item in db.iter(&rtxn)? {
                let (key, bytes) = item?;
                StoredEntry::decode(bytes)
                    .map_err(|e| anyhow!("{} record {:?}: {}", name, key, e))?;
            }
        }
        Ok(())
    }

    pub fn get(&self, table: Table, key: &str) -> Result<Option<CacheEntry>> {
        let rtxn = self.env.read_txn()?;
        match self.db(table).get(&rtxn, key)? {
            Some(bytes) => Ok(Some(StoredEntry::decode(bytes)?.open()?)),
            None => Ok(None),
        }
    }

    /// Insert or replace
    pub fn put(&self, table: Table, key: &str, entry: &CacheEntry) -> Result<()> {
        let bytes = StoredEntry::seal(entry)?.encode()?;
        self.put_raw(table, key, &bytes)
    }

    pub(crate) fn put_raw(&self, table: Table, key: &str, bytes: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db(table).put(&mut wtxn, key, bytes)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn delete(&self, table: Table, key: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let existed = self.db(table).delete(&mut wtxn, key)?;
        wtxn.commit()?;
        Ok(existed)
    }

    /// Delete every record in `scope` from both tables, in one transaction
    pub fn invalidate(&self, scope: &InvalidateScope) -> Result<usize> {
        let mut wtxn = self.env.write_txn()?;
        let mut removed = 0;

        for db in [&self.aggregates_db, &self.similar_db] {
            match scope.prefix() {
                Some(prefix) => {
                    let mut iter = db.prefix_iter_mut(&mut wtxn, &prefix)?;
                    while let Some(item) = iter.next() {
                        item?;
                        // SAFETY: no key or value borrowed from the iterator is alive here
                        unsafe { iter.del_current()? };
                        removed += 1;
                    }
                }
                None => {
                    let mut iter = db.iter_mut(&mut wtxn)?;
                    while let Some(item) = iter.next() {
                        let (key, _) = item?;
                        if !scope.matches(key) {
                            continue;
                        }
                        // SAFETY: as above; `key` is not used past this point
                        unsafe { iter.del_current()? };
                        removed += 1;
                    }
                }
            }
        }

        wtxn.commit()?;
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        let rtxn = self.env.read_txn()?;
        let total = self.aggregates_db.len(&rtxn)? + self.similar_db.len(&rtxn)?;
        Ok(total as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush and close the environment, waiting until the file is released
    pub fn close(self) {
        self.env.prepare_for_closing().wait();
    }
}

/// Delete a store file and its lock file. Missing files are not an error.
pub fn remove_files(path: &Path) -> std::io::Result<()> {
    let mut lock = path.as_os_str().to_owned();
    lock.push("-lock");
    for file in [path.to_path_buf(), PathBuf::from(lock)] {
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheKey;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    const MAP: usize = 16 * 1024 * 1024;

    fn entry(value: serde_json::Value) -> CacheEntry {
        CacheEntry::new(value, Utc::now())
    }

    #[test]
    fn test_put_get_replace() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("v.lmdb"), MAP).unwrap();
        let key = CacheKey::aggregate("v", "w", "h").encode();

        assert!(store.get(Table::Aggregates, &key).unwrap().is_none());
        store.put(Table::Aggregates, &key, &entry(json!(1))).unwrap();
        store.put(Table::Aggregates, &key, &entry(json!(2))).unwrap();

        let got = store.get(Table::Aggregates, &key).unwrap().unwrap();
        assert_eq!(got.value, json!(2));
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.get(Table::Similar, &key).unwrap().is_none());
        assert!(store.integrity_check().is_ok());
        store.close();
    }

    #[test]
    fn test_invalidate_by_prefix_and_scan() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("v.lmdb"), MAP).unwrap();
        for (widget, hash) in [("w1", "a"), ("w1", "b"), ("w2", "a")] {
            let key = CacheKey::aggregate("v", widget, hash).encode();
            store.put(Table::Aggregates, &key, &entry(json!(hash))).unwrap();
        }
        let key = CacheKey::similarity("v", "w1", "note.md", "x").encode();
        store.put(Table::Similar, &key, &entry(json!([]))).unwrap();

        let scope = InvalidateScope::VaultWidget {
            vault: "v".to_string(),
            widget: "w1".to_string(),
        };
        assert_eq!(store.invalidate(&scope).unwrap(), 3);
        assert_eq!(store.len().unwrap(), 1);

        assert_eq!(store.invalidate(&InvalidateScope::Widget("w2".to_string())).unwrap(), 1);
        assert!(store.is_empty().unwrap());
        assert_eq!(store.invalidate(&InvalidateScope::Vault("v".to_string())).unwrap(), 0);
        store.close();
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.lmdb");
        let key = CacheKey::aggregate("v", "w", "h").encode();

        let store = CacheStore::open(&path, MAP).unwrap();
        store.put(Table::Aggregates, &key, &entry(json!({"avg": 7}))).unwrap();
        store.close();

        let store = CacheStore::open(&path, MAP).unwrap();
        assert_eq!(
            store.get(Table::Aggregates, &key).unwrap().unwrap().value,
            json!({"avg": 7})
        );
        store.close();
    }

    #[test]
    fn test_integrity_check_detects_bad_record() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("v.lmdb"), MAP).unwrap();
        store.put_raw(Table::Similar, "bad", b"garbage").unwrap();
        assert!(store.integrity_check().is_err());
        assert!(store.get(Table::Similar, "bad").is_err());
        assert!(store.delete(Table::Similar, "bad").unwrap());
        assert!(store.integrity_check().is_ok());
        store.close();
    }

    #[test]
    fn test_remove_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.lmdb");
        CacheStore::open(&path, MAP).unwrap().close();
        assert!(path.exists());
        remove_files(&path).unwrap();
        assert!(!path.exists());
        remove_files(&path).unwrap();
    }
}

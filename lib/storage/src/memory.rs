// Volatile store used when the durable one is unavailable
use crate::entry::CacheEntry;
use crate::key::{InvalidateScope, Table};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory mirror of [`crate::store::CacheStore`]'s interface. Ordered
/// maps keep prefix invalidation a range scan, as it is on disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    aggregates: RwLock<BTreeMap<String, CacheEntry>>,
    similar: RwLock<BTreeMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, table: Table) -> &RwLock<BTreeMap<String, CacheEntry>> {
        match table {
            Table::Aggregates => &self.aggregates,
            Table::Similar => &self.similar,
        }
    }

    pub fn get(&self, table: Table, key: &str) -> Option<CacheEntry> {
        self.table(table).read().get(key).cloned()
    }

    pub fn put(&self, table: Table, key: &str, entry: CacheEntry) {
        self.table(table).write().insert(key.to_string(), entry);
    }

    pub fn invalidate(&self, scope: &InvalidateScope) -> usize {
        let mut removed = 0;
        for table in [&self.aggregates, &self.similar] {
            let mut map = table.write();
            let doomed: Vec<String> = match scope.prefix() {
                Some(prefix) => map
                    .range(prefix.clone()..)
                    .take_while(|(key, _)| key.starts_with(&prefix))
                    .map(|(key, _)| key.clone())
                    .collect(),
                None => map.keys().filter(|key| scope.matches(key)).cloned().collect(),
            };
            for key in &doomed {
                map.remove(key);
            }
            removed += doomed.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.aggregates.read().len() + self.similar.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

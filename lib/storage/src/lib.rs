//! # vaultlens Storage
//!
//! Content-addressed result cache for computed widgets.
//!
//! - **Durable**: one LMDB file per collection, checksummed records
//! - **Self-healing**: an unreadable store is deleted and rebuilt on open
//! - **Best-effort**: if the store cannot be used the cache runs from
//!   memory, and no cache failure ever reaches the caller
//!
//! ```rust
//! use serde_json::json;
//! use vaultlens_storage::{CacheKey, CacheManager, InvalidateScope};
//!
//! let manager = CacheManager::in_memory();
//! let key = CacheKey::aggregate("vault", "ratings", "fingerprint");
//! manager.set(&key, &json!({"avg": 7}));
//! assert_eq!(manager.get(&key).unwrap().value, json!({"avg": 7}));
//! assert_eq!(manager.invalidate(&InvalidateScope::Vault("vault".into())), 1);
//! ```

pub mod cache;
pub mod entry;
pub mod error;
pub mod key;
pub mod manager;
pub mod memory;
pub mod store;

pub use cache::{CacheMode, CacheOptions, PersistentCache, DEFAULT_LOCK_TIMEOUT, DEFAULT_MAP_SIZE};
pub use entry::CacheEntry;
pub use error::{CacheError, Result};
pub use key::{CacheKey, InvalidateScope, Table};
pub use manager::{store_file_name, CacheManager};
pub use memory::MemoryStore;
pub use store::CacheStore;

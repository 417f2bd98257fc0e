//! On-disk record format
//!
//! Each record is a bincode-encoded [`StoredEntry`]: the JSON payload as
//! text, the time it was computed, and a SHA-256 of the payload. A record
//! whose checksum does not match is treated as corrupt.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A cached value as handed back to callers
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub computed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: Value, computed_at: DateTime<Utc>) -> Self {
        Self { value, computed_at }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    payload: String,
    computed_at: DateTime<Utc>,
    checksum: String,
}

impl StoredEntry {
    pub(crate) fn seal(entry: &CacheEntry) -> Result<Self> {
        let payload = serde_json::to_string(&entry.value)?;
        let checksum = checksum(&payload);
        Ok(Self {
            payload,
            computed_at: entry.computed_at,
            checksum,
        })
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode and verify a record
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let stored: StoredEntry = bincode::deserialize(bytes)?;
        if checksum(&stored.payload) != stored.checksum {
            return Err(anyhow!("checksum mismatch"));
        }
        Ok(stored)
    }

    pub(crate) fn open(self) -> Result<CacheEntry> {
        Ok(CacheEntry {
            value: serde_json::from_str(&self.payload)?,
            computed_at: self.computed_at,
        })
    }
}

fn checksum(payload: &str) -> String {
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_roundtrip_preserves_timestamp() {
        let entry = CacheEntry::new(json!({"avg": 7, "count": 3}), Utc::now());
        let bytes = StoredEntry::seal(&entry).unwrap().encode().unwrap();
        let restored = StoredEntry::decode(&bytes).unwrap().open().unwrap();
        assert_eq!(restored, entry);
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let entry = CacheEntry::new(json!([1, 2, 3]), Utc::now());
        let mut stored = StoredEntry::seal(&entry).unwrap();
        stored.payload = "[1,2,4]".to_string();
        let bytes = stored.encode().unwrap();
        assert!(StoredEntry::decode(&bytes).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(StoredEntry::decode(b"not a record").is_err());
        assert!(StoredEntry::decode(&[]).is_err());
    }
}

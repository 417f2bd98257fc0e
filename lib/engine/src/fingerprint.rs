//! Content fingerprints
//!
//! Cache keys are SHA-256 digests over canonical JSON, so identical inputs
//! always produce identical keys. `serde_json` maps are ordered, which
//! makes the encoding canonical without extra work.

use crate::config::DefinitionConfig;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use vaultlens_core::{FieldPath, ParsedDocument};
use vaultlens_similarity::SimilarityItem;

/// Digest of a definition's config. Part of every key, so editing a
/// definition can never hit results computed for the old one.
pub fn definition_digest(config: &DefinitionConfig) -> serde_json::Result<String> {
    canonical_digest(config)
}

fn canonical_digest<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let canonical = serde_json::to_vec(value)?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

/// Fingerprint of an aggregate widget's input.
///
/// `documents` must be sorted by id. Each contributes its id and the values
/// at `paths`; `skipped` are the ids of matched documents that could not be
/// parsed.
pub fn content_fingerprint(
    definition_digest: &str,
    documents: &[&ParsedDocument],
    paths: &[FieldPath],
    skipped: &[String],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(definition_digest.as_bytes());
    for document in documents {
        let values: Vec<Value> = paths.iter().map(|p| document.get(p).to_json()).collect();
        update_json(&mut hasher, &json!([document.id, values]));
    }
    update_json(&mut hasher, &json!({ "skipped": skipped }));
    format!("{:x}", hasher.finalize())
}

/// Version of a similarity target's neighborhood: its own dimension values
/// and every candidate's, sorted by id.
pub fn content_version(
    definition_digest: &str,
    target: &SimilarityItem,
    candidates: &[SimilarityItem],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(definition_digest.as_bytes());
    update_json(&mut hasher, &item_json(target));

    let mut sorted: Vec<&SimilarityItem> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    for candidate in sorted {
        update_json(&mut hasher, &item_json(candidate));
    }
    format!("{:x}", hasher.finalize())
}

fn item_json(item: &SimilarityItem) -> Value {
    let values: Vec<Value> = item.values.iter().map(|v| v.to_json()).collect();
    json!([item.id, values])
}

fn update_json(hasher: &mut Sha256, value: &Value) {
    let encoded = value.to_string();
    // length prefix keeps record boundaries unambiguous
    hasher.update((encoded.len() as u64).to_le_bytes());
    hasher.update(encoded.as_bytes());
}

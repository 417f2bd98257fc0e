//! Per-dimension similarity functions
//!
//! All scores are in [0.0, 1.0] where 1.0 means identical.

use serde_json::Value;
use std::collections::BTreeSet;

/// Jaccard index |A ∩ B| / |A ∪ B|.
///
/// Two empty sets are identical (1.0); one empty and one non-empty share
/// nothing (0.0).
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Tokens of a set-valued field: every scalar element of a list, or the
/// single scalar itself, trimmed and lower-cased. Mappings have no token
/// form.
pub fn tokens(value: &Value) -> Option<BTreeSet<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(token).collect()),
        Value::Object(_) => None,
        scalar => Some(token(scalar).into_iter().collect()),
    }
}

fn token(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_lowercase(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Normalized inverse distance: `1 - |a - b| / range`, clamped to [0, 1].
///
/// A non-positive range means every compared value was equal, so only
/// identical values score.
pub fn proximity(a: f64, b: f64, range: f64) -> f64 {
    if range <= 0.0 || !range.is_finite() {
        return if a == b { 1.0 } else { 0.0 };
    }
    (1.0 - (a - b).abs() / range).clamp(0.0, 1.0)
}

/// Cosine of the angle between two vectors, clamped to [0, 1]. The shorter
/// vector is padded with zeros; a zero-magnitude vector scores 0.0.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let len = a.len().max(b.len());
    let at = |v: &[f64], i: usize| v.get(i).copied().unwrap_or(0.0);

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for i in 0..len {
        let (x, y) = (at(a, i), at(b, i));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_nan() {
        return 0.0;
    }
    similarity.clamp(0.0, 1.0)
}

/// A number, or a string holding one
pub fn numeric(value: &Value) -> Option<f64> {
    let x = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    x.filter(|x| x.is_finite())
}

/// A list whose every element is numeric, or a single number
pub fn numeric_vector(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Array(items) => items.iter().map(numeric).collect(),
        other => numeric(other).map(|x| vec![x]),
    }
}

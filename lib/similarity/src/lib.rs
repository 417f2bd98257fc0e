//! # vaultlens Similarity
//!
//! Weighted, multi-dimension similarity between documents.
//!
//! ## Features
//!
//! - **Dimensions**: Declarative field + weight + method triples
//! - **Comparators**: `set-overlap` (Jaccard), `proximity` (normalized inverse distance), `cosine`
//! - **Registry**: Custom comparators registered by name
//! - **Combiner**: Weighted average over the dimensions that apply to each pair
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use vaultlens_core::FieldValue;
//! use vaultlens_similarity::{compute_weighted_similarity, ComparatorRegistry, DimensionSpec, SimilarityItem};
//!
//! let dims = vec![DimensionSpec::set_overlap("tags", 1.0)];
//! let a = SimilarityItem::new("a", vec![FieldValue::Present(json!(["x", "y"]))]);
//! let b = SimilarityItem::new("b", vec![FieldValue::Present(json!(["x", "z"]))]);
//!
//! let ranked = compute_weighted_similarity(&a, &[b], &dims, &ComparatorRegistry::new()).unwrap();
//! assert!((ranked[0].score - 1.0 / 3.0).abs() < 1e-12);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Dimensions  │────>│ Comparator  │────>│  Weighted   │
//! │  (schema)   │     │  Registry   │     │  Combiner   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                         ┌─────────────┐
//!                                         │   Ranked    │
//!                                         │  neighbors  │
//!                                         └─────────────┘
//! ```

pub mod distance;
pub mod registry;
pub mod rerank;
pub mod schema;

pub use registry::{ComparatorFn, ComparatorRegistry, DimensionContext};
pub use rerank::{compute_weighted_similarity, RankedItem, SimilarityItem};
pub use schema::{DimensionSpec, SimilarityError, SimilarityMethod, COSINE, PROXIMITY, SET_OVERLAP};

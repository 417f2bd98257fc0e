//! # vaultlens Engine
//!
//! Turns declarative widget definitions into computed results.
//!
//! ```text
//!   YAML definitions ──► Validator ──► Definition ──► DependencyGraph ──► ComputationPlan
//!                                                                             │
//!   DocumentSet ──► pattern + filter ──► fingerprint ──► cache hit? ──────────┤
//!                                                           │ miss            │
//!                                                           ▼                 ▼
//!                                        aggregators / expressions / similarity
//!                                                           │
//!                                                           ▼
//!                                                      WidgetResult
//! ```
//!
//! - **Aggregate widgets** compute named fields phase by phase; a field may
//!   read raw document paths and any field of an earlier phase
//! - **Similarity widgets** rank documents against a target over weighted
//!   dimensions
//! - **Caching** keys every result by a digest of the definition and of the
//!   values it reads, so unrelated edits keep hitting the cache
//!
//! ```rust
//! use vaultlens_core::Document;
//! use vaultlens_engine::{DocumentSet, EngineConfig, RawConfig, WidgetEngine};
//!
//! let engine = WidgetEngine::new(EngineConfig::default());
//! let yaml = r#"
//! name: ratings
//! type: aggregate
//! source: { pattern: "books/*.md" }
//! fields:
//!   average: { aggregate: avg, field: rating }
//!   label: { expr: "concat(round(average, 1), ' / 10')" }
//! "#;
//! let outcome = engine.load_definitions(&[RawConfig::new("ratings.yaml", yaml)]);
//! let ratings = outcome.get("ratings").unwrap();
//!
//! let docs = vec![
//!     Document::new("books/a.md", "---\nrating: 8\n---\n"),
//!     Document::new("books/b.md", "---\nrating: 6\n---\n"),
//! ];
//! let result = engine.compute(ratings, &DocumentSet::new("vault", docs)).unwrap();
//! assert_eq!(result.get("label").unwrap(), "7 / 10");
//! ```

pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod plan;
pub mod result;

pub use config::{
    DefinitionConfig, DefinitionLoader, FieldSpecConfig, LoadOutcome, RawConfig, SourceConfig, Validator,
    WidgetKind,
};
pub use definition::{Definition, FieldSpec};
pub use engine::{DocumentSet, EngineConfig, WidgetEngine, DEFAULT_SIMILARITY_LIMIT};
pub use error::{ConfigError, CycleError, EngineError, LoadError, Result, Violation};
pub use graph::{build_graph, topological_sort, trace_cycle_path, DependencyGraph};
pub use plan::ComputationPlan;
pub use result::{SimilarItem, WidgetOutput, WidgetResult};

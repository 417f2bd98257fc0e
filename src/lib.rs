//! # vaultlens
//!
//! Declarative widgets over collections of documents with metadata headers.
//!
//! A widget definition names the documents it reads and what to compute
//! from them. vaultlens validates definitions, orders their computed fields,
//! evaluates them in a sandbox and caches the results in a crash-resilient
//! LMDB store.
//!
//! ## Quick Start
//!
//! ### From the command line
//!
//! ```bash
//! vaultlens --definitions widgets/ --documents notes/ --cache-dir .cache
//! vaultlens --definitions widgets/related.yaml --documents notes/ --target books/dune.md
//! ```
//!
//! ### As a Library
//!
//! ```rust
//! use vaultlens::prelude::*;
//!
//! let engine = WidgetEngine::new(EngineConfig::default());
//! let yaml = r#"
//! name: related
//! type: similarity
//! source: { pattern: "books/*.md" }
//! dimensions:
//!   - { field: tags, method: set-overlap, weight: 2 }
//!   - { field: year, method: proximity, range: 50 }
//! "#;
//! let outcome = engine.load_definitions(&[RawConfig::new("related.yaml", yaml)]);
//! let related = outcome.get("related").unwrap();
//!
//! let docs = vec![
//!     Document::new("books/dune.md", "---\ntags: [sf, desert]\nyear: 1965\n---\n"),
//!     Document::new("books/hyperion.md", "---\ntags: [sf]\nyear: 1989\n---\n"),
//!     Document::new("books/emma.md", "---\ntags: [romance]\nyear: 1815\n---\n"),
//! ];
//! let set = DocumentSet::new("library", docs).with_target("books/dune.md");
//! let result = engine.compute(related, &set).unwrap();
//! assert_eq!(result.items().unwrap()[0].id, "books/hyperion.md");
//! ```
//!
//! ## Crate Structure
//!
//! - `vaultlens-core` - Documents, field paths, source filters, aggregators
//! - `vaultlens-expr` - Sandboxed expression language with a timeout
//! - `vaultlens-similarity` - Comparators and weighted ranking
//! - `vaultlens-storage` - LMDB result cache with in-memory fallback
//! - `vaultlens-engine` - Definitions, dependency planning, orchestration

// Re-export core types
pub use vaultlens_core::{
    AggregatorRegistry, Document, FieldExtractor, FieldPath, FieldValue, FrontmatterExtractor, ParsedDocument,
    SourceFilter, SourcePattern,
};

// Re-export expressions and similarity
pub use vaultlens_expr::{CompiledExpr, Evaluator, ExprError};
pub use vaultlens_similarity::{ComparatorRegistry, DimensionSpec, SimilarityMethod};

// Re-export storage
pub use vaultlens_storage::{CacheManager, CacheMode, InvalidateScope};

// Re-export the engine
pub use vaultlens_engine::{
    ComputationPlan, Definition, DocumentSet, EngineConfig, EngineError, LoadError, LoadOutcome, RawConfig,
    SimilarItem, WidgetEngine, WidgetKind, WidgetResult,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Definition, Document, DocumentSet, EngineConfig, EngineError, FieldValue, InvalidateScope, LoadOutcome,
        RawConfig, WidgetEngine, WidgetKind, WidgetResult,
    };
}

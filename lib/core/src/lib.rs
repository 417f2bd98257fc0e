//! # vaultlens Core
//!
//! Core library for the vaultlens widget engine.
//!
//! This crate provides the document-side building blocks:
//!
//! - [`Document`] - A source document and its metadata header
//! - [`FieldPath`] / [`FieldValue`] - Dot-notation extraction with an explicit `Missing` marker
//! - [`SourcePattern`] / [`SourceFilter`] - Selecting the documents a definition applies to
//! - [`AggregatorRegistry`] - Named reductions (count, sum, avg, min, max, stddev)
//!
//! ## Example
//!
//! ```rust
//! use vaultlens_core::{AggregatorRegistry, Document, FieldPath};
//!
//! let docs = vec![
//!     Document::new("a.md", "---\nrating: 8\n---\n"),
//!     Document::new("b.md", "---\ntitle: no rating\n---\n"),
//!     Document::new("c.md", "---\nrating: 6\n---\n"),
//! ];
//!
//! let path = FieldPath::parse("rating").unwrap();
//! let values: Vec<_> = docs.iter().map(|d| d.parse().unwrap().get(&path)).collect();
//!
//! let registry = AggregatorRegistry::new();
//! assert_eq!(registry.apply("avg", &values).unwrap().as_f64(), Some(7.0));
//! assert_eq!(registry.apply("count", &values).unwrap().as_u64(), Some(3));
//! ```

pub mod aggregate;
pub mod document;
pub mod error;
pub mod filter;
pub mod path;
pub mod pattern;
pub mod value;

pub use aggregate::{AggregateFn, AggregatorRegistry};
pub use document::{extract, Document, FieldExtractor, FrontmatterExtractor, ParsedDocument};
pub use error::{Error, Result};
pub use filter::{Filter, FilterCondition, SourceFilter};
pub use path::FieldPath;
pub use pattern::SourcePattern;
pub use value::FieldValue;

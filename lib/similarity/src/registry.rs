//! Comparator registry
//!
//! Comparators are looked up by the method name written in a definition.
//! Registration happens before concurrent use; lookups are read-only.
//! Definitions resolve aliases such as `jaccard` before lookup, so an alias
//! can never name a custom comparator.

use crate::distance::{cosine, jaccard, numeric, numeric_vector, proximity, tokens};
use crate::schema::{DimensionSpec, SimilarityError, SimilarityMethod, COSINE, PROXIMITY, SET_OVERLAP};
use ahash::AHashMap;
use serde_json::Value;
use std::sync::Arc;

/// Per-dimension facts a comparator may need beyond the two values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DimensionContext {
    /// Configured range, else max - min over every compared item
    pub range: Option<f64>,
}

/// Scores two present, non-null values. `None` means the pair cannot be
/// compared on this dimension (e.g. a string where a number is needed) and
/// the dimension is left out for that pair.
pub type ComparatorFn = Arc<dyn Fn(&Value, &Value, &DimensionContext) -> Option<f64> + Send + Sync>;

#[derive(Clone)]
pub struct ComparatorRegistry {
    comparators: AHashMap<String, ComparatorFn>,
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComparatorRegistry {
    /// Registry with `set-overlap`, `proximity` and `cosine`
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.insert(SET_OVERLAP, |a, b, _| Some(jaccard(&tokens(a)?, &tokens(b)?)));
        registry.insert(PROXIMITY, |a, b, ctx| {
            Some(proximity(numeric(a)?, numeric(b)?, ctx.range.unwrap_or(0.0)))
        });
        registry.insert(COSINE, |a, b, _| {
            Some(cosine(&numeric_vector(a)?, &numeric_vector(b)?))
        });
        registry
    }

    pub fn empty() -> Self {
        Self {
            comparators: AHashMap::new(),
        }
    }

    /// Register a comparator; last writer wins. Alias names of the built-in
    /// methods are rejected.
    pub fn register<F>(&mut self, name: &str, comparator: F) -> Result<(), SimilarityError>
    where
        F: Fn(&Value, &Value, &DimensionContext) -> Option<f64> + Send + Sync + 'static,
    {
        let method = SimilarityMethod::from(name);
        if method.as_str() != name {
            return Err(SimilarityError::ReservedName {
                name: name.to_string(),
                builtin: method.as_str().to_string(),
            });
        }
        self.insert(name, comparator);
        Ok(())
    }

    fn insert<F>(&mut self, name: &str, comparator: F)
    where
        F: Fn(&Value, &Value, &DimensionContext) -> Option<f64> + Send + Sync + 'static,
    {
        self.comparators.insert(name.to_string(), Arc::new(comparator));
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&ComparatorFn> {
        self.comparators.get(name)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.comparators.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.comparators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Validate a dimension's shape and that its method is registered
    pub fn validate(&self, dimension: &DimensionSpec) -> Result<(), SimilarityError> {
        dimension.validate()?;
        if !self.contains(dimension.method.as_str()) {
            return Err(SimilarityError::UnknownMethod(dimension.method.to_string()));
        }
        Ok(())
    }

    /// Score one pair. Results outside [0, 1] are clamped; NaN is treated as
    /// not comparable.
    pub fn compare(
        &self,
        method: &str,
        a: &Value,
        b: &Value,
        context: &DimensionContext,
    ) -> Result<Option<f64>, SimilarityError> {
        let comparator = self
            .get(method)
            .ok_or_else(|| SimilarityError::UnknownMethod(method.to_string()))?;
        Ok(comparator(a, b, context)
            .filter(|score| !score.is_nan())
            .map(|score| score.clamp(0.0, 1.0)))
    }
}

impl std::fmt::Debug for ComparatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparatorRegistry")
            .field("comparators", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins() {
        let registry = ComparatorRegistry::new();
        let ctx = DimensionContext { range: Some(10.0) };
        let score = registry
            .compare(SET_OVERLAP, &json!(["x", "y"]), &json!(["x", "z"]), &ctx)
            .unwrap()
            .unwrap();
        assert!((score - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(registry.compare(PROXIMITY, &json!(1), &json!(6), &ctx).unwrap(), Some(0.5));
        assert_eq!(
            registry.compare(COSINE, &json!([1, 0]), &json!([2, 0]), &ctx).unwrap(),
            Some(1.0)
        );
    }

    #[test]
    fn test_incomparable_values() {
        let registry = ComparatorRegistry::new();
        let ctx = DimensionContext::default();
        assert_eq!(registry.compare(PROXIMITY, &json!("old"), &json!(3), &ctx).unwrap(), None);
        assert_eq!(registry.compare(SET_OVERLAP, &json!({"a": 1}), &json!("a"), &ctx).unwrap(), None);
    }

    #[test]
    fn test_custom_comparator_and_unknown_method() {
        let mut registry = ComparatorRegistry::new();
        registry
            .register("exact", |a, b, _| Some(if a == b { 1.0 } else { 0.0 }))
            .unwrap();
        registry.register("wild", |_, _, _| Some(7.0)).unwrap();
        let ctx = DimensionContext::default();

        assert_eq!(registry.compare("exact", &json!("a"), &json!("a"), &ctx).unwrap(), Some(1.0));
        assert_eq!(registry.compare("wild", &json!(1), &json!(2), &ctx).unwrap(), Some(1.0));
        assert_eq!(
            registry.compare("nope", &json!(1), &json!(2), &ctx),
            Err(SimilarityError::UnknownMethod("nope".to_string()))
        );

        let dim = DimensionSpec::new("title", 1.0, "exact".into());
        assert!(registry.validate(&dim).is_ok());
        let dim = DimensionSpec::new("title", 1.0, "fuzzy".into());
        assert!(matches!(registry.validate(&dim), Err(SimilarityError::UnknownMethod(_))));
    }

    #[test]
    fn test_alias_names_cannot_be_registered() {
        let mut registry = ComparatorRegistry::new();
        for alias in ["jaccard", "set_overlap"] {
            assert_eq!(
                registry.register(alias, |_, _, _| Some(0.0)),
                Err(SimilarityError::ReservedName {
                    name: alias.to_string(),
                    builtin: SET_OVERLAP.to_string(),
                })
            );
            assert!(!registry.contains(alias));
        }

        // a dimension written with the alias still scores with the built-in
        let dim = DimensionSpec::new("tags", 1.0, "jaccard".into());
        assert!(registry.validate(&dim).is_ok());
        let ctx = DimensionContext::default();
        let score = registry
            .compare(dim.method.as_str(), &json!(["x"]), &json!(["x", "y"]), &ctx)
            .unwrap();
        assert_eq!(score, Some(0.5));

        // replacing a built-in under its own name is allowed
        registry.register(COSINE, |_, _, _| Some(0.25)).unwrap();
        assert_eq!(registry.compare(COSINE, &json!([1]), &json!([1]), &ctx).unwrap(), Some(0.25));
    }
}

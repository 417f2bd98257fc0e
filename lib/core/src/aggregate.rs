//! Aggregator registry
//!
//! Aggregators reduce the values one field takes across a set of documents
//! to a single scalar. Entries that are missing, null or non-numeric are
//! skipped by every built-in except `count`, which measures the size of the
//! collection.

use crate::FieldValue;
use ahash::AHashMap;
use serde_json::Value;
use std::sync::Arc;

/// Signature shared by every aggregator
pub type AggregateFn = Arc<dyn Fn(&[FieldValue]) -> Value + Send + Sync>;

pub const COUNT: &str = "count";
pub const SUM: &str = "sum";
pub const AVG: &str = "avg";
pub const MIN: &str = "min";
pub const MAX: &str = "max";
pub const STDDEV: &str = "stddev";

/// Named aggregators, populated before concurrent use and read-only after.
#[derive(Clone)]
pub struct AggregatorRegistry {
    aggregators: AHashMap<String, AggregateFn>,
}

impl Default for AggregatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatorRegistry {
    /// Registry with the built-in aggregators
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(COUNT, count);
        registry.register(SUM, sum);
        registry.register(AVG, avg);
        registry.register(MIN, min);
        registry.register(MAX, max);
        registry.register(STDDEV, stddev);
        registry
    }

    pub fn empty() -> Self {
        Self {
            aggregators: AHashMap::new(),
        }
    }

    /// Register an aggregator. An existing entry of the same name is replaced.
    pub fn register<F>(&mut self, name: &str, aggregator: F)
    where
        F: Fn(&[FieldValue]) -> Value + Send + Sync + 'static,
    {
        self.aggregators.insert(name.to_string(), Arc::new(aggregator));
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&AggregateFn> {
        self.aggregators.get(name)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.aggregators.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.aggregators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run `name` over `values`; `None` if no such aggregator exists
    pub fn apply(&self, name: &str, values: &[FieldValue]) -> Option<Value> {
        self.aggregators.get(name).map(|f| f(values))
    }
}

impl std::fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorRegistry")
            .field("aggregators", &self.names())
            .finish()
    }
}

/// The valid numeric entries of `values`
pub fn numeric_values(values: &[FieldValue]) -> Vec<f64> {
    values.iter().filter_map(FieldValue::as_f64).collect()
}

fn number(x: f64) -> Value {
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub fn count(values: &[FieldValue]) -> Value {
    Value::from(values.len() as u64)
}

pub fn sum(values: &[FieldValue]) -> Value {
    number(numeric_values(values).iter().sum())
}

pub fn avg(values: &[FieldValue]) -> Value {
    let nums = numeric_values(values);
    if nums.is_empty() {
        return Value::Null;
    }
    number(nums.iter().sum::<f64>() / nums.len() as f64)
}

pub fn min(values: &[FieldValue]) -> Value {
    numeric_values(values)
        .into_iter()
        .reduce(f64::min)
        .map(number)
        .unwrap_or(Value::Null)
}

pub fn max(values: &[FieldValue]) -> Value {
    numeric_values(values)
        .into_iter()
        .reduce(f64::max)
        .map(number)
        .unwrap_or(Value::Null)
}

/// Population standard deviation (divides by N). Fewer than two valid
/// entries yield null.
pub fn stddev(values: &[FieldValue]) -> Value {
    let nums = numeric_values(values);
    if nums.len() < 2 {
        return Value::Null;
    }
    let n = nums.len() as f64;
    let mean = nums.iter().sum::<f64>() / n;
    let variance = nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    number(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn vals(raw: &[Option<f64>]) -> Vec<FieldValue> {
        raw.iter()
            .map(|v| match v {
                Some(x) => FieldValue::Present(json!(x)),
                None => FieldValue::Missing,
            })
            .collect()
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(count(&[]), json!(0));
        assert_eq!(sum(&[]).as_f64(), Some(0.0));
        assert_eq!(avg(&[]), Value::Null);
        assert_eq!(min(&[]), Value::Null);
        assert_eq!(max(&[]), Value::Null);
        assert_eq!(stddev(&[]), Value::Null);
    }

    #[test]
    fn test_missing_entries() {
        let values = vals(&[Some(8.0), None, Some(6.0)]);
        assert_eq!(count(&values), json!(3));
        assert_eq!(sum(&values).as_f64(), Some(14.0));
        assert_eq!(avg(&values).as_f64(), Some(7.0));
        assert_eq!(min(&values).as_f64(), Some(6.0));
        assert_eq!(max(&values).as_f64(), Some(8.0));
    }

    #[test]
    fn test_sum_of_only_missing_is_zero() {
        let values = vals(&[None, None]);
        assert_eq!(sum(&values).as_f64(), Some(0.0));
        assert_eq!(avg(&values), Value::Null);
        assert_eq!(count(&values), json!(2));
    }

    #[test]
    fn test_stddev_population() {
        assert_eq!(stddev(&vals(&[Some(5.0)])), Value::Null);
        let sd = stddev(&vals(&[Some(2.0), Some(4.0), Some(4.0), Some(4.0), Some(5.0), Some(5.0), Some(7.0), Some(9.0)]));
        assert!((sd.as_f64().unwrap() - 2.0).abs() < 1e-12);
        let sd = stddev(&vals(&[Some(1.0), None, Some(3.0)]));
        assert!((sd.as_f64().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_numeric_entries_are_skipped() {
        let values = vec![
            FieldValue::Present(json!("n/a")),
            FieldValue::Present(json!("4")),
            FieldValue::Present(json!(true)),
            FieldValue::Present(Value::Null),
        ];
        assert_eq!(count(&values), json!(4));
        assert_eq!(avg(&values).as_f64(), Some(4.0));
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = AggregatorRegistry::new();
        assert!(!registry.contains("median"));
        registry.register("sum", |_: &[FieldValue]| json!(42));
        registry.register("median", |_: &[FieldValue]| json!(1));
        assert_eq!(registry.apply("sum", &[]), Some(json!(42)));
        assert!(registry.contains("median"));
        assert_eq!(registry.apply("unknown", &[]), None);
        assert_eq!(registry.names().len(), 7);
    }

    proptest! {
        #[test]
        fn prop_count_includes_missing(raw in prop::collection::vec(prop::option::of(-1e6f64..1e6), 0..40)) {
            let values = vals(&raw);
            prop_assert_eq!(count(&values), json!(raw.len()));

            let present: Vec<f64> = raw.iter().flatten().copied().collect();
            let total = sum(&values).as_f64().unwrap();
            prop_assert!((total - present.iter().sum::<f64>()).abs() < 1e-6);

            if present.is_empty() {
                prop_assert_eq!(avg(&values), Value::Null);
                prop_assert_eq!(max(&values), Value::Null);
            } else {
                let expected_max = present.iter().copied().fold(f64::MIN, f64::max);
                prop_assert_eq!(max(&values).as_f64(), Some(expected_max));
            }
        }
    }
}

// Integration tests for vaultlens
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use vaultlens::prelude::*;
use vaultlens::{AggregatorRegistry, CacheManager, CacheMode, ComparatorRegistry, Evaluator, ExprError, LoadError};
use vaultlens_core::{extract, FieldPath};
use vaultlens_engine::{build_graph, topological_sort, FieldSpec};
use vaultlens_similarity::DimensionContext;
use vaultlens_storage::{CacheKey, CacheOptions, PersistentCache};

fn doc(id: &str, header: &str) -> Document {
    Document::new(id, format!("---\n{}\n---\n", header))
}

fn load_one(engine: &WidgetEngine, yaml: &str) -> Arc<Definition> {
    let outcome = engine.load_definitions(&[RawConfig::new("widget.yaml", yaml)]);
    assert!(outcome.is_clean(), "{:?}", outcome.errors);
    outcome.definitions[0].clone()
}

fn values(raw: &[Option<f64>]) -> Vec<FieldValue> {
    raw.iter()
        .map(|v| match v {
            Some(x) => FieldValue::Present(json!(x)),
            None => FieldValue::Missing,
        })
        .collect()
}

// ============================================================================
// Field extraction
// ============================================================================

#[test]
fn test_extract_missing_is_not_an_error() {
    let document = doc("a.md", "book:\n  authors: [Le Guin, Herbert]\n  year: 1969");
    assert_eq!(
        extract(&document, "book.authors.1").unwrap(),
        FieldValue::Present(json!("Herbert"))
    );
    assert_eq!(extract(&document, "book.authors.5").unwrap(), FieldValue::Missing);
    assert_eq!(extract(&document, "book.publisher.name").unwrap(), FieldValue::Missing);

    let broken = Document::new("bad.md", "---\nbook: [unclosed\n---\n");
    assert!(extract(&broken, "book").unwrap_err().is_extraction());
}

// ============================================================================
// Aggregators
// ============================================================================

#[test]
fn test_aggregator_edge_cases() {
    let registry = AggregatorRegistry::new();
    assert_eq!(registry.apply("stddev", &values(&[Some(4.0)])), Some(Value::Null));
    assert_eq!(registry.apply("stddev", &[]), Some(Value::Null));
    assert_eq!(registry.apply("avg", &[]), Some(Value::Null));
    assert_eq!(registry.apply("sum", &[]).and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(registry.apply("min", &values(&[None, None])), Some(Value::Null));
}

proptest! {
    #[test]
    fn prop_count_includes_missing(raw in prop::collection::vec(prop::option::of(-1e6f64..1e6), 0..40)) {
        let registry = AggregatorRegistry::new();
        let all = values(&raw);
        let present: Vec<Option<f64>> = raw.iter().filter(|v| v.is_some()).cloned().collect();

        prop_assert_eq!(registry.apply("count", &all), Some(json!(raw.len())));
        for name in ["sum", "avg", "min", "max", "stddev"] {
            prop_assert_eq!(registry.apply(name, &all), registry.apply(name, &values(&present)));
        }
    }
}

// ============================================================================
// Similarity comparators
// ============================================================================

#[test]
fn test_set_overlap_conventions() {
    let registry = ComparatorRegistry::new();
    let ctx = DimensionContext::default();
    let score = |a: Value, b: Value| registry.compare("set-overlap", &a, &b, &ctx).unwrap();

    assert_eq!(score(json!(["x", "y"]), json!(["y", "x"])), Some(1.0));
    assert_eq!(score(json!(["x"]), json!(["y"])), Some(0.0));
    assert_eq!(score(json!([]), json!([])), Some(1.0));
    assert_eq!(score(json!([]), json!(["y"])), Some(0.0));
}

// ============================================================================
// Definitions and planning
// ============================================================================

#[test]
fn test_cycle_rejected_at_load() {
    let engine = WidgetEngine::new(EngineConfig::default());
    let yaml = r#"
widgets:
  - name: loop
    type: aggregate
    source: {}
    fields:
      A: { expr: "B + 1" }
      B: { expr: "A * 2" }
  - name: fine
    type: aggregate
    source: {}
    fields:
      n: { aggregate: count, field: rating }
"#;
    let outcome = engine.load_definitions(&[RawConfig::new("widgets.yaml", yaml)]);
    assert_eq!(outcome.definitions.len(), 1);
    assert!(outcome.get("fine").is_some());

    match &outcome.errors[..] {
        [LoadError::Cycle(err)] => {
            assert_eq!(err.definition, "loop");
            assert!(err.path.contains(&"A".to_string()));
            assert!(err.path.contains(&"B".to_string()));
            assert!(err.to_string().contains("loop"));
        }
        other => panic!("expected one cycle error, got {:?}", other),
    }
}

#[test]
fn test_every_violation_reported() {
    let engine = WidgetEngine::new(EngineConfig::default());
    let yaml = r#"
name: broken
type: aggregate
source: { pattern: 7 }
fields:
  a: { aggregate: median, field: rating }
  b: { expr: "eval('1')" }
"#;
    let outcome = engine.load_definitions(&[RawConfig::new("broken.yaml", yaml)]);
    let message = outcome.errors[0].to_string();
    assert!(message.contains("source.pattern"), "{}", message);
    assert!(message.contains("fields.a"), "{}", message);
    assert!(message.contains("fields.b"), "{}", message);
}

proptest! {
    /// Field `f{i}` may only read fields with a smaller index, so the graph is acyclic
    #[test]
    fn prop_plan_contains_every_field_once(edges in prop::collection::vec(prop::collection::vec(any::<bool>(), 0..12), 1..12)) {
        let evaluator = Evaluator::new();
        let mut fields = BTreeMap::new();
        for (i, row) in edges.iter().enumerate() {
            let reads: Vec<String> = row
                .iter()
                .take(i)
                .enumerate()
                .filter(|&(_, &edge)| edge)
                .map(|(j, _)| format!("f{}", j))
                .collect();
            let source = if reads.is_empty() { "raw.value + 1".to_string() } else { reads.join(" + ") };
            fields.insert(format!("f{}", i), FieldSpec::Expr(evaluator.compile(&source).unwrap()));
        }

        let plan = topological_sort(&build_graph(&fields)).unwrap();
        let mut seen: Vec<&String> = plan.phases().iter().flatten().collect();
        prop_assert_eq!(seen.len(), fields.len());
        seen.sort();
        seen.dedup();
        prop_assert_eq!(seen.len(), fields.len());
    }
}

// ============================================================================
// Cache
// ============================================================================

fn arbitrary_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "\\PC{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("\\PC{0,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn prop_cache_round_trip(value in arbitrary_json(), widget in "\\PC{0,10}") {
        let dir = TempDir::new().unwrap();
        let cache = PersistentCache::open(dir.path().join("v.lmdb"), CacheOptions::default());
        prop_assert_eq!(cache.mode(), CacheMode::Persistent);

        let key = CacheKey::aggregate("vault", &widget, "fp");
        cache.set(&key, &value);
        prop_assert_eq!(cache.get(&key).map(|e| e.value), Some(value));
    }
}

#[test]
fn test_cache_round_trip_fixed_values() {
    let dir = TempDir::new().unwrap();
    let cache = PersistentCache::open(dir.path().join("v.lmdb"), CacheOptions::default());
    for (i, value) in [
        json!(""),
        json!("naïve café ☕ 日本語"),
        json!({"nested": {"list": [1, [2, {"x": null}]], "empty": {}}}),
    ]
    .into_iter()
    .enumerate()
    {
        let key = CacheKey::similarity("vault", "w", &format!("doc{}", i), "v1");
        cache.set(&key, &value);
        assert_eq!(cache.get(&key).unwrap().value, value);
    }
}

fn seed(manager: &CacheManager) {
    for vault in ["v1", "v2"] {
        for widget in ["w1", "w2"] {
            manager.set(&CacheKey::aggregate(vault, widget, "a"), &json!(1));
            manager.set(&CacheKey::similarity(vault, widget, "doc.md", "b"), &json!([]));
        }
    }
}

fn exercise_scopes(manager: &CacheManager) {
    seed(manager);
    let scope = InvalidateScope::VaultWidget {
        vault: "v1".to_string(),
        widget: "w1".to_string(),
    };
    assert_eq!(manager.invalidate(&scope), 2);
    assert!(manager.get(&CacheKey::aggregate("v1", "w1", "a")).is_none());
    assert!(manager.get(&CacheKey::aggregate("v1", "w2", "a")).is_some());
    assert!(manager.get(&CacheKey::aggregate("v2", "w1", "a")).is_some());

    assert_eq!(manager.invalidate(&InvalidateScope::Widget("w2".to_string())), 4);
    assert_eq!(manager.invalidate(&InvalidateScope::Vault("v2".to_string())), 2);
    assert_eq!(manager.invalidate(&InvalidateScope::Vault("nowhere".to_string())), 0);
    assert_eq!(manager.invalidate(&InvalidateScope::Widget("nothing".to_string())), 0);
}

#[test]
fn test_invalidation_scopes_persistent() {
    let dir = TempDir::new().unwrap();
    let manager = CacheManager::new(Some(dir.path().to_path_buf()), CacheOptions::default());
    exercise_scopes(&manager);
    assert_eq!(manager.mode("v1"), CacheMode::Persistent);
}

#[test]
fn test_fallback_behaves_like_persistent() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let manager = CacheManager::new(Some(blocker), CacheOptions::default());
    assert_eq!(manager.mode("v1"), CacheMode::Fallback);
    exercise_scopes(&manager);

    let key = CacheKey::aggregate("v1", "w", "fp");
    manager.set(&key, &json!({"avg": 7}));
    assert_eq!(manager.get(&key).unwrap().value, json!({"avg": 7}));
}

#[test]
fn test_closed_cache_is_inert() {
    let dir = TempDir::new().unwrap();
    let manager = CacheManager::new(Some(dir.path().to_path_buf()), CacheOptions::default());
    let key = CacheKey::aggregate("v", "w", "fp");
    manager.set(&key, &json!(1));
    manager.close();
    manager.close();

    assert!(manager.get(&key).is_none());
    manager.set(&key, &json!(2));
    assert_eq!(manager.invalidate(&InvalidateScope::Vault("v".to_string())), 0);
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn test_end_to_end_ratings() {
    let engine = WidgetEngine::new(EngineConfig::default());
    let definition = load_one(
        &engine,
        r#"
name: ratings
type: aggregate
source: { pattern: "*.md" }
fields:
  average: { aggregate: avg, field: rating }
  total: { aggregate: count, field: rating }
"#,
    );
    let docs = vec![
        doc("a.md", "rating: 8"),
        doc("b.md", "rating: null"),
        doc("c.md", "rating: 6"),
    ];
    let result = engine.compute(&definition, &DocumentSet::new("vault", docs)).unwrap();
    assert_eq!(result.get("average").and_then(Value::as_f64), Some(7.0));
    assert_eq!(result.get("total"), Some(&json!(3)));

    let wire = serde_json::to_value(&result).unwrap();
    assert_eq!(wire["widget"], "ratings");
    assert_eq!(wire["fromCache"], false);
    assert!(wire["computedAt"].is_string());
}

#[test]
fn test_end_to_end_tag_similarity() {
    let engine = WidgetEngine::new(EngineConfig::default());
    let definition = load_one(
        &engine,
        r#"
name: related
type: similarity
source: {}
dimensions:
  - { field: tags, method: set-overlap, weight: 1.0 }
"#,
    );
    let docs = vec![doc("A.md", "tags: [x, y]"), doc("B.md", "tags: [x, z]")];
    let set = DocumentSet::new("vault", docs).with_target("A.md");

    let result = engine.compute(&definition, &set).unwrap();
    let items = result.items().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "B.md");
    assert!((items[0].score - 1.0 / 3.0).abs() < 1e-12);
}

#[test]
fn test_missing_dimension_is_excluded_not_zero() {
    let engine = WidgetEngine::new(EngineConfig::default());
    let definition = load_one(
        &engine,
        r#"
name: mixed
type: similarity
source: {}
dimensions:
  - { field: tags, method: set-overlap, weight: 1 }
  - { field: year, method: proximity, weight: 3, range: 100 }
"#,
    );
    let docs = vec![
        doc("t.md", "tags: [a]\nyear: 2000"),
        doc("u.md", "tags: [a]"),
        doc("w.md", "tags: [b]\nyear: 2000"),
    ];
    let set = DocumentSet::new("vault", docs).with_target("t.md");
    let result = engine.compute(&definition, &set).unwrap();
    let items = result.items().unwrap();
    assert_eq!(items[0].id, "u.md");
    assert_eq!(items[0].score, 1.0);
    assert_eq!(items[1].id, "w.md");
    assert!((items[1].score - 0.75).abs() < 1e-12);
}

#[test]
fn test_expression_timeout_is_typed() {
    let config = EngineConfig::default().with_expression_timeout(std::time::Duration::ZERO);
    let engine = WidgetEngine::new(config);
    let definition = load_one(
        &engine,
        "name: slow\ntype: aggregate\nsource: {}\nfields:\n  s: { expr: 'x + 1' }\n",
    );
    let err = engine
        .compute(&definition, &DocumentSet::new("vault", vec![doc("a.md", "x: 1")]))
        .unwrap_err();
    assert!(err.is_timeout(), "{}", err);
    assert!(matches!(err, EngineError::Expression { source: ExprError::Timeout { .. }, .. }));
}

#[test]
fn test_results_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::default().with_cache_dir(dir.path());
    let yaml = "name: n\ntype: aggregate\nsource: {}\nfields:\n  total: { aggregate: sum, field: pages }\n";
    let set = DocumentSet::new("vault", vec![doc("a.md", "pages: 120"), doc("b.md", "pages: 80")]);

    let first = {
        let engine = WidgetEngine::new(config.clone());
        let definition = load_one(&engine, yaml);
        let result = engine.compute(&definition, &set).unwrap();
        engine.close();
        result
    };

    let engine = WidgetEngine::new(config);
    let definition = load_one(&engine, yaml);
    let again = engine.compute(&definition, &set).unwrap();
    assert!(again.from_cache);
    assert_eq!(again.computed_at, first.computed_at);
    assert_eq!(again.get("total").and_then(Value::as_f64), Some(200.0));
}

#[test]
fn test_field_paths_order() {
    let a = FieldPath::parse("a.b").unwrap();
    let b = FieldPath::parse("a.c").unwrap();
    assert!(a < b);
}

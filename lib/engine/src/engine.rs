use crate::config::{DefinitionLoader, LoadOutcome, RawConfig, WidgetKind};
use crate::definition::{Definition, FieldSpec};
use crate::error::{EngineError, Result};
use crate::fingerprint::{content_fingerprint, content_version};
use crate::graph::referenced_field;
use crate::result::{SimilarItem, WidgetOutput, WidgetResult};
use chrono::Utc;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use vaultlens_core::{
    AggregateFn, AggregatorRegistry, Document, FieldExtractor, FieldValue, FrontmatterExtractor, ParsedDocument,
};
use vaultlens_expr::{Bindings, CompiledExpr, Evaluator, DEFAULT_TIMEOUT};
use vaultlens_similarity::{compute_weighted_similarity, ComparatorRegistry, DimensionContext, SimilarityItem};
use vaultlens_storage::{CacheKey, CacheManager, CacheOptions, InvalidateScope, DEFAULT_LOCK_TIMEOUT, DEFAULT_MAP_SIZE};

pub const DEFAULT_SIMILARITY_LIMIT: usize = 10;

/// Engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory for durable cache files; `None` keeps the cache in memory
    pub cache_dir: Option<PathBuf>,
    /// Wall-clock budget of one expression evaluation
    pub expression_timeout: Duration,
    /// How long a cache writer waits before its write is dropped
    pub cache_lock_timeout: Duration,
    /// Upper bound on each cache file
    pub cache_map_size: usize,
    /// Neighbors returned when a similarity widget sets no `limit`
    pub default_similarity_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            expression_timeout: DEFAULT_TIMEOUT,
            cache_lock_timeout: DEFAULT_LOCK_TIMEOUT,
            cache_map_size: DEFAULT_MAP_SIZE,
            default_similarity_limit: DEFAULT_SIMILARITY_LIMIT,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_expression_timeout(mut self, timeout: Duration) -> Self {
        self.expression_timeout = timeout;
        self
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            map_size: self.cache_map_size,
            lock_timeout: self.cache_lock_timeout,
        }
    }
}

/// The documents of one collection, plus the document a similarity widget
/// is computed for
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    pub vault_id: String,
    pub documents: Vec<Document>,
    pub target: Option<String>,
}

impl DocumentSet {
    pub fn new(vault_id: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            vault_id: vault_id.into(),
            documents,
            target: None,
        }
    }

    #[must_use]
    pub fn with_target(mut self, id: impl Into<String>) -> Self {
        self.target = Some(id.into());
        self
    }
}

/// Matched documents sorted by id, and the ids that failed to parse
struct Resolved {
    matched: Vec<ParsedDocument>,
    skipped: Vec<String>,
}

/// Loads definitions and computes widgets, consulting the cache first.
///
/// Registration methods take `&mut self`; once the engine is shared the
/// registries are read-only.
pub struct WidgetEngine {
    config: EngineConfig,
    extractor: Arc<dyn FieldExtractor>,
    aggregators: AggregatorRegistry,
    comparators: ComparatorRegistry,
    evaluator: Evaluator,
    cache: CacheManager,
}

impl WidgetEngine {
    pub fn new(config: EngineConfig) -> Self {
        let aggregators = AggregatorRegistry::new();
        let mut evaluator = Evaluator::with_timeout(config.expression_timeout);
        for name in aggregators.names() {
            // `min`/`max` builtins already accept a list as well as scalars
            if evaluator.functions().contains(name) {
                continue;
            }
            if let Some(aggregate) = aggregators.get(name) {
                evaluator.register_function(name, aggregate_function(aggregate.clone()));
            }
        }

        let cache = CacheManager::new(config.cache_dir.clone(), config.cache_options());
        debug!(cache_dir = ?config.cache_dir, "Widget engine created");

        Self {
            config,
            extractor: Arc::new(FrontmatterExtractor),
            aggregators,
            comparators: ComparatorRegistry::new(),
            evaluator,
            cache,
        }
    }

    /// Replace the document parser
    #[must_use]
    pub fn with_extractor<E: FieldExtractor + 'static>(mut self, extractor: E) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn aggregators(&self) -> &AggregatorRegistry {
        &self.aggregators
    }

    pub fn comparators(&self) -> &ComparatorRegistry {
        &self.comparators
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Register an aggregator; it also becomes an expression function over a list
    pub fn register_aggregator<F>(&mut self, name: &str, aggregator: F)
    where
        F: Fn(&[FieldValue]) -> Value + Send + Sync + 'static,
    {
        self.aggregators.register(name, aggregator);
        if let Some(aggregate) = self.aggregators.get(name) {
            self.evaluator
                .register_function(name, aggregate_function(aggregate.clone()));
        }
    }

    /// Register a similarity comparator; alias names of the built-ins are rejected
    pub fn register_comparator<F>(&mut self, name: &str, comparator: F) -> Result<()>
    where
        F: Fn(&Value, &Value, &DimensionContext) -> Option<f64> + Send + Sync + 'static,
    {
        self.comparators.register(name, comparator)?;
        Ok(())
    }

    pub fn register_function<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.evaluator.register_function(name, function);
    }

    /// Validate and build definitions against the current registries
    pub fn load_definitions(&self, configs: &[RawConfig]) -> LoadOutcome {
        DefinitionLoader::new(&self.aggregators, &self.evaluator, &self.comparators).load(configs)
    }

    /// Compute one widget over a document set, serving it from the cache
    /// when the relevant content is unchanged
    pub fn compute(&self, definition: &Definition, documents: &DocumentSet) -> Result<WidgetResult> {
        match definition.kind() {
            WidgetKind::Aggregate => self.compute_aggregate(definition, documents),
            WidgetKind::Similarity => self.compute_similarity(definition, documents),
        }
    }

    /// Drop cached results; returns how many were removed
    pub fn invalidate(&self, scope: &InvalidateScope) -> usize {
        self.cache.invalidate(scope)
    }

    /// Close every cache file
    pub fn close(&self) {
        self.cache.close();
    }

    // ========================================================================
    // Aggregate widgets
    // ========================================================================

    fn compute_aggregate(&self, definition: &Definition, documents: &DocumentSet) -> Result<WidgetResult> {
        let resolved = self.resolve(definition, documents);
        let refs: Vec<&ParsedDocument> = resolved.matched.iter().collect();
        let fingerprint = content_fingerprint(
            definition.digest(),
            &refs,
            definition.read_paths(),
            &resolved.skipped,
        );
        let key = CacheKey::aggregate(&documents.vault_id, definition.name(), &fingerprint);
        let cache = self.cache.cache_for(&documents.vault_id);

        if let Some(entry) = cache.get(&key) {
            if let Value::Object(data) = entry.value {
                debug!(widget = definition.name(), "aggregate served from cache");
                return Ok(WidgetResult {
                    widget: definition.name().to_string(),
                    output: WidgetOutput::Aggregate { data },
                    computed_at: entry.computed_at,
                    from_cache: true,
                    skipped_documents: resolved.skipped.len(),
                });
            }
        }

        let data = self.run_plan(definition, &resolved.matched)?;
        let computed_at = Utc::now();
        cache.set_at(&key, &Value::Object(data.clone()), computed_at);

        Ok(WidgetResult {
            widget: definition.name().to_string(),
            output: WidgetOutput::Aggregate { data },
            computed_at,
            from_cache: false,
            skipped_documents: resolved.skipped.len(),
        })
    }

    /// Run the plan phase by phase. Any failing field fails the widget,
    /// since later phases may read it.
    fn run_plan(&self, definition: &Definition, documents: &[ParsedDocument]) -> Result<Map<String, Value>> {
        let mut computed = Map::new();
        for phase in definition.plan().phases() {
            for name in phase {
                let Some(spec) = definition.field(name) else {
                    continue;
                };
                let value = match spec {
                    FieldSpec::Aggregate { aggregator, field } => {
                        let column: Vec<FieldValue> = documents.iter().map(|d| d.get(field)).collect();
                        self.aggregators.apply(aggregator, &column).ok_or_else(|| {
                            EngineError::UnknownAggregator {
                                field: name.clone(),
                                name: aggregator.clone(),
                            }
                        })?
                    }
                    FieldSpec::Expr(expr) => {
                        let bindings = bind(definition, expr, &computed, documents);
                        self.evaluator
                            .evaluate_compiled(expr, &bindings)
                            .map_err(|source| EngineError::Expression {
                                field: name.clone(),
                                source,
                            })?
                    }
                };
                computed.insert(name.clone(), value);
            }
        }
        Ok(computed)
    }

    // ========================================================================
    // Similarity widgets
    // ========================================================================

    fn compute_similarity(&self, definition: &Definition, documents: &DocumentSet) -> Result<WidgetResult> {
        let widget = definition.name().to_string();
        let target_id = documents
            .target
            .as_deref()
            .ok_or_else(|| EngineError::MissingTarget { widget: widget.clone() })?;
        let target_doc = documents
            .documents
            .iter()
            .find(|d| d.id == target_id)
            .ok_or_else(|| EngineError::TargetNotFound {
                widget: widget.clone(),
                target: target_id.to_string(),
            })?;
        let target_parsed = self.extractor.parse(target_doc)?;

        let resolved = self.resolve(definition, documents);
        let paths = definition.dimension_paths();
        let target = SimilarityItem::new(target_id, target_parsed.get_many(paths));
        let candidates: Vec<SimilarityItem> = resolved
            .matched
            .iter()
            .filter(|d| d.id != target_id)
            .map(|d| SimilarityItem::new(d.id.clone(), d.get_many(paths)))
            .collect();

        let version = content_version(definition.digest(), &target, &candidates);
        let key = CacheKey::similarity(&documents.vault_id, &widget, target_id, &version);
        let cache = self.cache.cache_for(&documents.vault_id);

        if let Some(entry) = cache.get(&key) {
            match serde_json::from_value::<Vec<SimilarItem>>(entry.value) {
                Ok(items) => {
                    debug!(widget = %widget, target = target_id, "neighbors served from cache");
                    return Ok(WidgetResult {
                        widget,
                        output: WidgetOutput::Similarity { items },
                        computed_at: entry.computed_at,
                        from_cache: true,
                        skipped_documents: resolved.skipped.len(),
                    });
                }
                Err(e) => warn!("Ignoring malformed cached neighbors for '{}': {}", widget, e),
            }
        }

        let ranked = compute_weighted_similarity(&target, &candidates, definition.dimensions(), &self.comparators)?;
        let min_score = definition.min_score().unwrap_or(0.0);
        let limit = definition
            .limit()
            .unwrap_or(self.config.default_similarity_limit);
        let items: Vec<SimilarItem> = ranked
            .into_iter()
            .filter(|r| r.score >= min_score)
            .take(limit)
            .map(|r| SimilarItem {
                id: r.id,
                score: r.score,
            })
            .collect();

        let computed_at = Utc::now();
        match serde_json::to_value(&items) {
            Ok(value) => cache.set_at(&key, &value, computed_at),
            Err(e) => warn!("Neighbors for '{}' not cached: {}", widget, e),
        }

        Ok(WidgetResult {
            widget,
            output: WidgetOutput::Similarity { items },
            computed_at,
            from_cache: false,
            skipped_documents: resolved.skipped.len(),
        })
    }

    // ========================================================================
    // Source resolution
    // ========================================================================

    /// Parse the documents under `source.pattern` and keep those passing
    /// `source.filter`. Malformed documents are logged and skipped.
    fn resolve(&self, definition: &Definition, documents: &DocumentSet) -> Resolved {
        let mut matched = Vec::new();
        let mut skipped = Vec::new();

        for document in documents.documents.iter().filter(|d| definition.selects(&d.id)) {
            match self.extractor.parse(document) {
                Ok(parsed) => {
                    if definition.matches(&parsed) {
                        matched.push(parsed);
                    }
                }
                Err(e) => {
                    warn!(
                        "Skipping document '{}' for widget '{}': {}",
                        document.id,
                        definition.name(),
                        e
                    );
                    skipped.push(document.id.clone());
                }
            }
        }

        matched.sort_by(|a, b| a.id.cmp(&b.id));
        skipped.sort();
        Resolved { matched, skipped }
    }
}

impl std::fmt::Debug for WidgetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetEngine")
            .field("config", &self.config)
            .field("aggregators", &self.aggregators.names())
            .field("comparators", &self.comparators.names())
            .field("cache", &self.cache)
            .finish()
    }
}

/// Bind what an expression reads: computed fields by name, and raw source
/// paths as the list of their values across documents (missing => null)
fn bind(
    definition: &Definition,
    expr: &CompiledExpr,
    computed: &Map<String, Value>,
    documents: &[ParsedDocument],
) -> Bindings {
    let mut bindings = Bindings::new();
    for variable in expr.variables() {
        if let Some(field) = referenced_field(variable, |f| definition.fields().contains_key(f)) {
            if let Some(value) = computed.get(field) {
                bindings.insert(field.to_string(), value.clone());
            }
        } else if let Some(path) = definition.raw_inputs().get(variable) {
            let column = documents.iter().map(|d| d.get(path).to_json()).collect();
            bindings.insert(variable.clone(), Value::Array(column));
        }
    }
    bindings
}

/// Expose an aggregator to expressions: one list argument is the column,
/// otherwise the arguments themselves are
fn aggregate_function(
    aggregate: AggregateFn,
) -> impl Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static {
    move |args: &[Value]| {
        let values: Vec<FieldValue> = match args {
            [Value::Array(items)] => items.iter().cloned().map(FieldValue::Present).collect(),
            _ => args.iter().cloned().map(FieldValue::Present).collect(),
        };
        Ok(aggregate(&values))
    }
}

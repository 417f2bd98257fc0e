//! Widget definition config
//!
//! Config text (YAML or JSON) is read into a generic tree, checked against
//! every rule below so a report lists all violations at once, and only
//! then deserialized into [`DefinitionConfig`].
//!
//! ```yaml
//! name: reading-stats
//! type: aggregate
//! source:
//!   pattern: "books/**/*.md"
//!   filter: { status: read }
//! fields:
//!   average: { aggregate: avg, field: rating }
//!   books: { aggregate: count, field: rating }
//!   summary: { expr: "round(average, 1)" }
//! ```

use crate::definition::Definition;
use crate::error::{ConfigError, LoadError, Violation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use vaultlens_core::{AggregatorRegistry, FieldPath, SourceFilter, SourcePattern};
use vaultlens_expr::Evaluator;
use vaultlens_similarity::{ComparatorRegistry, DimensionSpec, SimilarityError};

const DEFINITION_KEYS: &[&str] = &[
    "name",
    "type",
    "kind",
    "location",
    "source",
    "fields",
    "dimensions",
    "limit",
    "min_score",
    "minScore",
    "display",
];
const SOURCE_KEYS: &[&str] = &["pattern", "filter"];
const FIELD_KEYS: &[&str] = &["aggregate", "field", "expr"];
const DIMENSION_KEYS: &[&str] = &["field", "weight", "method", "range"];
const RESERVED_FIELD_NAMES: &[&str] = &["true", "false", "null", "and", "or", "not"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetKind {
    Aggregate,
    Similarity,
}

impl WidgetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetKind::Aggregate => "aggregate",
            WidgetKind::Similarity => "similarity",
        }
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One widget definition as written in config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionConfig {
    pub name: String,

    #[serde(rename = "type", alias = "kind")]
    pub kind: WidgetKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,

    pub source: SourceConfig,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldSpecConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<DimensionSpec>,

    /// Maximum number of neighbors for similarity widgets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Neighbors scoring below this are dropped
    #[serde(default, alias = "minScore", skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default)]
    pub pattern: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpecConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

impl FieldSpecConfig {
    pub fn aggregate(aggregator: &str, field: &str) -> Self {
        Self {
            aggregate: Some(aggregator.to_string()),
            field: Some(field.to_string()),
            expr: None,
        }
    }

    pub fn expr(source: &str) -> Self {
        Self {
            expr: Some(source.to_string()),
            ..Self::default()
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Checks a config tree against the registries it will run with
pub struct Validator<'a> {
    aggregators: &'a AggregatorRegistry,
    evaluator: &'a Evaluator,
    comparators: &'a ComparatorRegistry,
    violations: Vec<Violation>,
}

impl<'a> Validator<'a> {
    pub fn new(
        aggregators: &'a AggregatorRegistry,
        evaluator: &'a Evaluator,
        comparators: &'a ComparatorRegistry,
    ) -> Self {
        Self {
            aggregators,
            evaluator,
            comparators,
            violations: Vec::new(),
        }
    }

    /// Every violation in `tree`; empty when it is a valid definition
    pub fn check(mut self, tree: &Value) -> Vec<Violation> {
        let Some(root) = tree.as_object() else {
            return vec![Violation::new("", "definition must be a mapping")];
        };

        self.unknown_keys("", root, DEFINITION_KEYS);
        self.check_name(root.get("name"));
        let kind = self.check_kind(root);
        self.check_source(root.get("source"));

        match kind {
            Some(WidgetKind::Aggregate) => {
                self.check_fields(root.get("fields"));
                for key in ["dimensions", "limit", "min_score", "minScore"] {
                    if root.contains_key(key) {
                        self.violation(key, "only valid for similarity widgets");
                    }
                }
            }
            Some(WidgetKind::Similarity) => {
                self.check_dimensions(root.get("dimensions"));
                self.check_limits(root);
                if root.contains_key("fields") {
                    self.violation("fields", "only valid for aggregate widgets");
                }
            }
            None => {}
        }

        self.violations
    }

    fn violation(&mut self, path: impl Into<String>, rule: impl Into<String>) {
        self.violations.push(Violation::new(path, rule));
    }

    fn unknown_keys(&mut self, prefix: &str, map: &Map<String, Value>, known: &[&str]) {
        for key in map.keys().filter(|k| !known.contains(&k.as_str())) {
            self.violation(join_path(prefix, key), "unknown key");
        }
    }

    fn check_name(&mut self, name: Option<&Value>) {
        match name {
            None => self.violation("name", "is required"),
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(_) => self.violation("name", "must be a non-empty string"),
        }
    }

    fn check_kind(&mut self, root: &Map<String, Value>) -> Option<WidgetKind> {
        let (key, value) = match (root.get("type"), root.get("kind")) {
            (Some(_), Some(_)) => {
                self.violation("kind", "conflicts with 'type'; set only one");
                return None;
            }
            (Some(v), None) => ("type", v),
            (None, Some(v)) => ("kind", v),
            (None, None) => {
                self.violation("type", "is required");
                return None;
            }
        };
        match value.as_str() {
            Some("aggregate") => Some(WidgetKind::Aggregate),
            Some("similarity") => Some(WidgetKind::Similarity),
            _ => {
                self.violation(key, "must be 'aggregate' or 'similarity'");
                None
            }
        }
    }

    fn check_source(&mut self, source: Option<&Value>) {
        let Some(source) = source else {
            self.violation("source", "is required");
            return;
        };
        let Some(source) = source.as_object() else {
            self.violation("source", "must be a mapping");
            return;
        };
        self.unknown_keys("source", source, SOURCE_KEYS);

        match source.get("pattern") {
            None => {}
            Some(Value::String(pattern)) => {
                if let Err(e) = SourcePattern::new(pattern) {
                    self.violation("source.pattern", e.to_string());
                }
            }
            Some(_) => self.violation("source.pattern", "must be a string"),
        }
        if let Some(filter) = source.get("filter") {
            if let Err(e) = SourceFilter::from_config(filter) {
                self.violation("source.filter", e.to_string());
            }
        }
    }

    fn check_fields(&mut self, fields: Option<&Value>) {
        let fields = match fields {
            None => return self.violation("fields", "is required for aggregate widgets"),
            Some(Value::Object(fields)) if fields.is_empty() => {
                return self.violation("fields", "must define at least one field")
            }
            Some(Value::Object(fields)) => fields,
            Some(_) => return self.violation("fields", "must be a mapping of field names to specs"),
        };

        for (name, spec) in fields {
            let path = format!("fields.{}", name);
            if !is_field_name(name) {
                self.violation(
                    &path,
                    "field names must match [A-Za-z_][A-Za-z0-9_]* and not be a keyword",
                );
            }
            let Some(spec) = spec.as_object() else {
                self.violation(&path, "must be a mapping");
                continue;
            };
            self.unknown_keys(&path, spec, FIELD_KEYS);

            match (spec.get("aggregate"), spec.get("expr")) {
                (Some(aggregate), None) => self.check_aggregate_field(&path, aggregate, spec.get("field")),
                (None, Some(expr)) => {
                    self.check_expr_field(&path, expr);
                    if spec.contains_key("field") {
                        self.violation(format!("{}.field", path), "only valid with 'aggregate'");
                    }
                }
                _ => self.violation(&path, "must set exactly one of 'aggregate' or 'expr'"),
            }
        }
    }

    fn check_aggregate_field(&mut self, path: &str, aggregate: &Value, field: Option<&Value>) {
        match aggregate.as_str() {
            Some(name) if self.aggregators.contains(name) => {}
            Some(name) => self.violation(
                format!("{}.aggregate", path),
                format!(
                    "unknown aggregator '{}' (known: {})",
                    name,
                    self.aggregators.names().join(", ")
                ),
            ),
            None => self.violation(format!("{}.aggregate", path), "must be a string"),
        }
        match field {
            None => self.violation(format!("{}.field", path), "is required with 'aggregate'"),
            Some(Value::String(field)) => {
                if let Err(e) = FieldPath::parse(field) {
                    self.violation(format!("{}.field", path), e.to_string());
                }
            }
            Some(_) => self.violation(format!("{}.field", path), "must be a string"),
        }
    }

    fn check_expr_field(&mut self, path: &str, expr: &Value) {
        let Some(source) = expr.as_str() else {
            self.violation(format!("{}.expr", path), "must be a string");
            return;
        };
        if let Err(e) = self.evaluator.compile(source) {
            self.violation(format!("{}.expr", path), e.to_string());
        }
    }

    fn check_dimensions(&mut self, dimensions: Option<&Value>) {
        let dimensions = match dimensions {
            None => return self.violation("dimensions", "is required for similarity widgets"),
            Some(Value::Array(dims)) if dims.is_empty() => {
                return self.violation("dimensions", "must define at least one dimension")
            }
            Some(Value::Array(dims)) => dims,
            Some(_) => return self.violation("dimensions", "must be a list"),
        };

        for (i, dimension) in dimensions.iter().enumerate() {
            let path = format!("dimensions[{}]", i);
            let Some(map) = dimension.as_object() else {
                self.violation(&path, "must be a mapping");
                continue;
            };
            self.unknown_keys(&path, map, DIMENSION_KEYS);
            for key in ["field", "method"] {
                if !map.get(key).map_or(false, Value::is_string) {
                    self.violation(format!("{}.{}", path, key), "is required and must be a string");
                }
            }
            for key in ["weight", "range"] {
                if map.get(key).map_or(false, |v| !v.is_number()) {
                    self.violation(format!("{}.{}", path, key), "must be a number");
                }
            }

            let Ok(spec) = serde_json::from_value::<DimensionSpec>(dimension.clone()) else {
                continue;
            };
            if let Err(e) = self.comparators.validate(&spec) {
                let key = match e {
                    SimilarityError::UnknownMethod(_) => "method",
                    SimilarityError::InvalidWeight { .. } => "weight",
                    SimilarityError::InvalidRange { .. } => "range",
                    _ => "field",
                };
                let rule = match e {
                    SimilarityError::UnknownMethod(_) => format!(
                        "{} (known: {})",
                        e,
                        self.comparators.names().join(", ")
                    ),
                    _ => e.to_string(),
                };
                self.violation(format!("{}.{}", path, key), rule);
            }
        }
    }

    fn check_limits(&mut self, root: &Map<String, Value>) {
        if let Some(limit) = root.get("limit") {
            if !limit.as_u64().map_or(false, |n| n > 0) {
                self.violation("limit", "must be a positive integer");
            }
        }
        for key in ["min_score", "minScore"] {
            if let Some(score) = root.get(key) {
                if !score.as_f64().map_or(false, |s| (0.0..=1.0).contains(&s)) {
                    self.violation(key, "must be a number between 0 and 1");
                }
            }
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn is_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    head_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED_FIELD_NAMES.contains(&name)
}

// ============================================================================
// Loading
// ============================================================================

/// Config text and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConfig {
    pub origin: String,
    pub text: String,
}

impl RawConfig {
    pub fn new(origin: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            text: text.into(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        Ok(Self::new(path.display().to_string(), std::fs::read_to_string(path)?))
    }
}

/// Definitions that loaded, and why the rest did not
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub definitions: Vec<Arc<Definition>>,
    pub errors: Vec<LoadError>,
}

impl LoadOutcome {
    pub fn get(&self, name: &str) -> Option<&Arc<Definition>> {
        self.definitions.iter().find(|d| d.name() == name)
    }

    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct DefinitionLoader<'a> {
    aggregators: &'a AggregatorRegistry,
    evaluator: &'a Evaluator,
    comparators: &'a ComparatorRegistry,
}

impl<'a> DefinitionLoader<'a> {
    pub fn new(
        aggregators: &'a AggregatorRegistry,
        evaluator: &'a Evaluator,
        comparators: &'a ComparatorRegistry,
    ) -> Self {
        Self {
            aggregators,
            evaluator,
            comparators,
        }
    }

    /// Load every definition in `configs`. A bad definition is reported and
    /// skipped; the others still load. Names must be unique across the batch.
    pub fn load(&self, configs: &[RawConfig]) -> LoadOutcome {
        let mut outcome = LoadOutcome::default();

        for raw in configs {
            let tree: Value = match serde_yaml::from_str(&raw.text) {
                Ok(tree) => tree,
                Err(e) => {
                    let err = LoadError::Parse {
                        origin: raw.origin.clone(),
                        message: e.to_string(),
                    };
                    warn!("{}", err);
                    outcome.errors.push(err);
                    continue;
                }
            };

            for (origin, entry) in split_definitions(&raw.origin, tree) {
                let loaded = self.load_value(&origin, &entry).and_then(|definition| {
                    match outcome.get(definition.name()) {
                        Some(first) => Err(LoadError::Invalid(ConfigError {
                            origin: origin.clone(),
                            name: Some(definition.name().to_string()),
                            violations: vec![Violation::new(
                                "name",
                                format!("duplicates the definition in {}", first.origin()),
                            )],
                        })),
                        None => Ok(definition),
                    }
                });
                match loaded {
                    Ok(definition) => {
                        debug!(
                            "Loaded {} widget '{}' from {}",
                            definition.kind(),
                            definition.name(),
                            origin
                        );
                        outcome.definitions.push(Arc::new(definition));
                    }
                    Err(e) => {
                        warn!("{}", e);
                        outcome.errors.push(e);
                    }
                }
            }
        }

        outcome
    }

    /// Validate and build a single definition tree
    pub fn load_value(&self, origin: &str, tree: &Value) -> Result<Definition, LoadError> {
        let name = tree
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let fail = |violations: Vec<Violation>| {
            LoadError::Invalid(ConfigError {
                origin: origin.to_string(),
                name: name.clone(),
                violations,
            })
        };

        let violations = Validator::new(self.aggregators, self.evaluator, self.comparators).check(tree);
        if !violations.is_empty() {
            return Err(fail(violations));
        }
        let config: DefinitionConfig = serde_json::from_value(tree.clone())
            .map_err(|e| fail(vec![Violation::new("", e.to_string())]))?;

        Definition::build(config, origin, self.evaluator)
    }
}

/// A file holds one mapping, a list of mappings, or `widgets: [...]`
fn split_definitions(origin: &str, tree: Value) -> Vec<(String, Value)> {
    let entries = match tree {
        Value::Null => return Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut map) if !map.contains_key("name") && map.contains_key("widgets") => {
            match map.remove("widgets") {
                Some(Value::Array(items)) => items,
                Some(other) => return vec![(origin.to_string(), other)],
                None => Vec::new(),
            }
        }
        single => return vec![(origin.to_string(), single)],
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| (format!("{}[{}]", origin, i), entry))
        .collect()
}

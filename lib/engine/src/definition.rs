use crate::config::{DefinitionConfig, WidgetKind};
use crate::error::{ConfigError, CycleError, LoadError, Violation};
use crate::fingerprint::definition_digest;
use crate::graph::{build_graph, topological_sort, DependencyGraph};
use crate::plan::ComputationPlan;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use vaultlens_core::{FieldPath, Filter, ParsedDocument, SourceFilter, SourcePattern};
use vaultlens_expr::{CompiledExpr, Evaluator};
use vaultlens_similarity::DimensionSpec;

/// How one output field is computed
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    /// A named aggregator over one source path
    Aggregate { aggregator: String, field: FieldPath },
    /// A formula over raw source paths and other fields
    Expr(CompiledExpr),
}

impl FieldSpec {
    /// Identifiers read by an expression field
    pub fn variables(&self) -> Option<&BTreeSet<String>> {
        match self {
            FieldSpec::Expr(expr) => Some(expr.variables()),
            FieldSpec::Aggregate { .. } => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_expr(&self) -> bool {
        matches!(self, FieldSpec::Expr(_))
    }
}

/// A validated, immutable widget definition
#[derive(Debug, Clone)]
pub struct Definition {
    config: DefinitionConfig,
    origin: String,
    pattern: SourcePattern,
    filter: Option<SourceFilter>,
    fields: BTreeMap<String, FieldSpec>,
    graph: DependencyGraph,
    plan: ComputationPlan,
    /// Expression identifiers that are source paths, not fields
    raw_inputs: BTreeMap<String, FieldPath>,
    dimension_paths: Vec<FieldPath>,
    read_paths: Vec<FieldPath>,
    digest: String,
}

impl Definition {
    /// Build from a config that already passed validation. Anything still
    /// wrong is reported as a config error; a dependency loop as a cycle.
    pub fn build(config: DefinitionConfig, origin: &str, evaluator: &Evaluator) -> Result<Self, LoadError> {
        let invalid = |path: String, rule: String| {
            LoadError::Invalid(ConfigError {
                origin: origin.to_string(),
                name: Some(config.name.clone()),
                violations: vec![Violation::new(path, rule)],
            })
        };

        let pattern = SourcePattern::new(&config.source.pattern)
            .map_err(|e| invalid("source.pattern".to_string(), e.to_string()))?;
        let filter = match &config.source.filter {
            Some(filter) => Some(
                SourceFilter::from_config(filter)
                    .map_err(|e| invalid("source.filter".to_string(), e.to_string()))?,
            ),
            None => None,
        };

        let mut fields = BTreeMap::new();
        for (name, spec) in &config.fields {
            let field = match (&spec.aggregate, &spec.field, &spec.expr) {
                (Some(aggregator), Some(path), None) => FieldSpec::Aggregate {
                    aggregator: aggregator.clone(),
                    field: FieldPath::parse(path)
                        .map_err(|e| invalid(format!("fields.{}.field", name), e.to_string()))?,
                },
                (None, None, Some(source)) => FieldSpec::Expr(
                    evaluator
                        .compile(source)
                        .map_err(|e| invalid(format!("fields.{}.expr", name), e.to_string()))?,
                ),
                _ => {
                    return Err(invalid(
                        format!("fields.{}", name),
                        "must set exactly one of 'aggregate' or 'expr'".to_string(),
                    ))
                }
            };
            fields.insert(name.clone(), field);
        }

        let graph = build_graph(&fields);
        let plan = topological_sort(&graph).map_err(|e| CycleError {
            definition: config.name.clone(),
            path: e.path,
        })?;

        let mut raw_inputs = BTreeMap::new();
        for variable in graph.leaves() {
            let path = FieldPath::parse(variable)
                .map_err(|e| invalid(format!("fields.{}", variable), e.to_string()))?;
            raw_inputs.insert(variable.to_string(), path);
        }

        let dimension_paths = config
            .dimensions
            .iter()
            .enumerate()
            .map(|(i, d)| {
                FieldPath::parse(&d.field)
                    .map_err(|e| invalid(format!("dimensions[{}].field", i), e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut read_paths: BTreeSet<FieldPath> = raw_inputs.values().cloned().collect();
        read_paths.extend(dimension_paths.iter().cloned());
        for spec in fields.values() {
            if let FieldSpec::Aggregate { field, .. } = spec {
                read_paths.insert(field.clone());
            }
        }

        let digest = definition_digest(&config)
            .map_err(|e| invalid("name".to_string(), format!("definition cannot be fingerprinted: {}", e)))?;
        Ok(Self {
            config,
            origin: origin.to_string(),
            pattern,
            filter,
            fields,
            graph,
            plan,
            raw_inputs,
            dimension_paths,
            read_paths: read_paths.into_iter().collect(),
            digest,
        })
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> WidgetKind {
        self.config.kind
    }

    /// Where the config came from, for error reports
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Display surface hint; not interpreted by the engine
    pub fn location(&self) -> Option<&Value> {
        self.config.location.as_ref()
    }

    /// Presentation settings passed through untouched
    pub fn display(&self) -> Option<&Value> {
        self.config.display.as_ref()
    }

    pub fn config(&self) -> &DefinitionConfig {
        &self.config
    }

    pub fn pattern(&self) -> &SourcePattern {
        &self.pattern
    }

    pub fn filter(&self) -> Option<&SourceFilter> {
        self.filter.as_ref()
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldSpec> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn plan(&self) -> &ComputationPlan {
        &self.plan
    }

    pub fn raw_inputs(&self) -> &BTreeMap<String, FieldPath> {
        &self.raw_inputs
    }

    pub fn dimensions(&self) -> &[DimensionSpec] {
        &self.config.dimensions
    }

    /// Parsed form of each dimension's field, in dimension order
    pub fn dimension_paths(&self) -> &[FieldPath] {
        &self.dimension_paths
    }

    /// Every source path whose value can change the result
    pub fn read_paths(&self) -> &[FieldPath] {
        &self.read_paths
    }

    /// SHA-256 of the canonical config
    #[inline]
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn limit(&self) -> Option<usize> {
        self.config.limit
    }

    pub fn min_score(&self) -> Option<f64> {
        self.config.min_score
    }

    /// Whether a document id falls under `source.pattern`
    pub fn selects(&self, id: &str) -> bool {
        self.pattern.matches(id)
    }

    /// Pattern and filter together
    pub fn matches(&self, document: &ParsedDocument) -> bool {
        self.selects(&document.id)
            && self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(document))
    }
}

//! # vaultlens Expressions
//!
//! A small, allow-listed formula language for computed widget fields.
//!
//! Formulas are data, not code: there are no statements, no assignment, no
//! loops and no access to anything but the bindings handed in and the
//! functions registered on the [`Evaluator`]. Every evaluation runs against
//! a wall-clock budget and fails with [`ExprError::Timeout`] when it is
//! exceeded.
//!
//! ```rust
//! use serde_json::json;
//! use vaultlens_expr::{Bindings, Evaluator};
//!
//! let evaluator = Evaluator::new();
//! let mut bindings = Bindings::new();
//! bindings.insert("total".to_string(), json!(21));
//! bindings.insert("count".to_string(), json!(3));
//!
//! let value = evaluator.evaluate("round(total / count, 1)", &bindings).unwrap();
//! assert_eq!(value, json!(7));
//! ```

pub mod ast;
pub mod error;
pub mod eval;
pub mod functions;
pub mod parser;
pub mod security;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use error::{ExprError, Result, SecurityViolation};
pub use eval::{truthy, values_equal, Bindings};
pub use functions::{FunctionRegistry, NativeFn};

use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// A formula that passed syntax and security validation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
    variables: BTreeSet<String>,
}

impl CompiledExpr {
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    #[must_use]
    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Free identifiers, sorted
    #[inline]
    #[must_use]
    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    functions: FunctionRegistry,
    timeout: Duration,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            functions: FunctionRegistry::new(),
            timeout,
        }
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    #[inline]
    #[must_use]
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Register a callable function. Must happen before concurrent use.
    pub fn register_function<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.register(name, function);
    }

    /// Syntax check only
    pub fn validate(&self, source: &str) -> Result<()> {
        bounded_parse(source).map(|_| ())
    }

    /// Full static check: forbidden constructs, limits, unknown functions
    pub fn validate_security(&self, source: &str) -> Result<()> {
        self.compile(source).map(|_| ())
    }

    /// Free identifiers the formula reads
    pub fn get_variables(&self, source: &str) -> Result<BTreeSet<String>> {
        Ok(bounded_parse(source)?.variables())
    }

    pub fn compile(&self, source: &str) -> Result<CompiledExpr> {
        security::scan(source)?;
        let ast = parser::parse(source)?;
        security::check_tree(&ast, &self.functions)?;
        let variables = ast.variables();
        Ok(CompiledExpr {
            source: source.to_string(),
            ast,
            variables,
        })
    }

    pub fn evaluate(&self, source: &str, bindings: &Bindings) -> Result<Value> {
        let compiled = self.compile(source)?;
        self.evaluate_compiled(&compiled, bindings)
    }

    /// Run a compiled formula. Identifiers missing from `bindings` are
    /// rejected before anything executes.
    pub fn evaluate_compiled(&self, expr: &CompiledExpr, bindings: &Bindings) -> Result<Value> {
        if let Some(unbound) = expr
            .variables
            .iter()
            .find(|name| eval::resolve(bindings, name).is_none())
        {
            return Err(SecurityViolation::UnboundIdentifier(unbound.clone()).into());
        }

        let result = eval::Interpreter::new(bindings, &self.functions, self.timeout).eval(&expr.ast);
        if let Err(ExprError::Timeout { limit }) = &result {
            tracing::debug!(expr = %expr.source, ?limit, "expression timed out");
        }
        result
    }

    /// Evaluate one formula over many binding sets. Results are in input
    /// order; a failing item never aborts the others.
    pub fn evaluate_batch(&self, source: &str, binding_sets: &[Bindings]) -> Vec<Result<Value>> {
        let compiled = match self.compile(source) {
            Ok(compiled) => compiled,
            Err(e) => return binding_sets.iter().map(|_| Err(e.clone())).collect(),
        };

        let results: Vec<Result<Value>> = binding_sets
            .par_iter()
            .map(|bindings| self.evaluate_compiled(&compiled, bindings))
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::debug!(expr = %source, failed, total = results.len(), "batch evaluation had failures");
        }
        results
    }
}

/// Parse with the size and nesting limits applied first, so the recursive
/// descent never sees unbounded input
fn bounded_parse(source: &str) -> Result<Expr> {
    if source.len() > security::MAX_LENGTH {
        return Err(SecurityViolation::TooLong {
            len: source.len(),
            max: security::MAX_LENGTH,
        }
        .into());
    }
    if security::nesting(source) > security::MAX_NESTING {
        return Err(SecurityViolation::TooDeep {
            max: security::MAX_NESTING,
        }
        .into());
    }
    parser::parse(source)
}

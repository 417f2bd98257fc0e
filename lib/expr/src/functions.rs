//! Functions callable from expressions
//!
//! Every builtin is pure. Embedders extend the set with
//! [`FunctionRegistry::register`]; the engine registers each aggregator here
//! so `avg(rating)` works inside formulas.

use ahash::AHashMap;
use serde_json::Value;
use std::sync::Arc;

/// A native function. Errors are plain messages; the interpreter wraps them
/// with the function name.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;

#[derive(Clone)]
pub struct FunctionRegistry {
    functions: AHashMap<String, NativeFn>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Registry with the scalar builtins
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("abs", |args| unary_math(args, f64::abs));
        registry.register("floor", |args| unary_math(args, f64::floor));
        registry.register("ceil", |args| unary_math(args, f64::ceil));
        registry.register("sqrt", sqrt);
        registry.register("round", round);
        registry.register("pow", pow);
        registry.register("min", |args| extremum(args, f64::min));
        registry.register("max", |args| extremum(args, f64::max));
        registry.register("clamp", clamp);
        registry.register("coalesce", coalesce);
        registry.register("len", len);
        registry.register("lower", |args| map_text(args, |s| s.to_lowercase()));
        registry.register("upper", |args| map_text(args, |s| s.to_uppercase()));
        registry.register("concat", concat);
        registry.register("contains", contains);
        registry.register("if", if_else);
        registry
    }

    pub fn empty() -> Self {
        Self {
            functions: AHashMap::new(),
        }
    }

    /// Register a function; an existing entry of the same name is replaced
    pub fn register<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&NativeFn> {
        self.functions.get(name)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

type FnResult = std::result::Result<Value, String>;

/// JSON number for `x`; whole numbers in the exact range stay integers.
pub fn number(x: f64) -> FnResult {
    if !x.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    if x.fract() == 0.0 && x.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::from(x as i64));
    }
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| "result is not a finite number".to_string())
}

fn arity(args: &[Value], min: usize, max: usize) -> std::result::Result<(), String> {
    if args.len() < min || args.len() > max {
        if min == max {
            return Err(format!("expected {} argument(s), got {}", min, args.len()));
        }
        return Err(format!(
            "expected {} to {} arguments, got {}",
            min,
            max,
            args.len()
        ));
    }
    Ok(())
}

/// `None` for null, the number for numbers, an error otherwise
fn numeric(value: &Value) -> std::result::Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => Err(format!("expected a number, got {}", other)),
    }
}

fn unary_math(args: &[Value], f: fn(f64) -> f64) -> FnResult {
    arity(args, 1, 1)?;
    match numeric(&args[0])? {
        Some(x) => number(f(x)),
        None => Ok(Value::Null),
    }
}

fn sqrt(args: &[Value]) -> FnResult {
    arity(args, 1, 1)?;
    match numeric(&args[0])? {
        Some(x) if x < 0.0 => Err("square root of a negative number".to_string()),
        Some(x) => number(x.sqrt()),
        None => Ok(Value::Null),
    }
}

fn round(args: &[Value]) -> FnResult {
    arity(args, 1, 2)?;
    let digits = match args.get(1) {
        Some(d) => numeric(d)?.ok_or("digits must be a number")?,
        None => 0.0,
    };
    if digits.fract() != 0.0 || !(0.0..=15.0).contains(&digits) {
        return Err("digits must be a whole number between 0 and 15".to_string());
    }
    match numeric(&args[0])? {
        Some(x) => {
            let scale = 10f64.powi(digits as i32);
            number((x * scale).round() / scale)
        }
        None => Ok(Value::Null),
    }
}

fn pow(args: &[Value]) -> FnResult {
    arity(args, 2, 2)?;
    match (numeric(&args[0])?, numeric(&args[1])?) {
        (Some(base), Some(exp)) => number(base.powf(exp)),
        _ => Ok(Value::Null),
    }
}

/// `min(a, b, ...)` or `min(list)`; nulls are skipped, no values gives null
/// Same coercion the field aggregators apply: numbers and numeric strings
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|x| x.is_finite())
}

/// Values that do not coerce to a number are skipped
fn extremum(args: &[Value], pick: fn(f64, f64) -> f64) -> FnResult {
    let items = match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    };
    items
        .iter()
        .filter_map(coerce_number)
        .reduce(pick)
        .map_or(Ok(Value::Null), number)
}

fn clamp(args: &[Value]) -> FnResult {
    arity(args, 3, 3)?;
    let lo = numeric(&args[1])?.ok_or("lower bound must be a number")?;
    let hi = numeric(&args[2])?.ok_or("upper bound must be a number")?;
    if lo > hi {
        return Err("lower bound exceeds upper bound".to_string());
    }
    match numeric(&args[0])? {
        Some(x) => number(x.clamp(lo, hi)),
        None => Ok(Value::Null),
    }
}

fn coalesce(args: &[Value]) -> FnResult {
    Ok(args
        .iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null))
}

fn len(args: &[Value]) -> FnResult {
    arity(args, 1, 1)?;
    let n = match &args[0] {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(format!("len() needs a string or list, got {}", other)),
    };
    Ok(Value::from(n as u64))
}

fn map_text(args: &[Value], f: fn(&str) -> String) -> FnResult {
    arity(args, 1, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(f(s))),
        other => Err(format!("expected a string, got {}", other)),
    }
}

/// Text form used by `concat` and string `+`
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn concat(args: &[Value]) -> FnResult {
    Ok(Value::String(args.iter().map(display).collect()))
}

fn contains(args: &[Value]) -> FnResult {
    arity(args, 2, 2)?;
    let found = match (&args[0], &args[1]) {
        (Value::Null, _) => false,
        (Value::String(haystack), needle) => haystack.contains(display(needle).as_str()),
        (Value::Array(items), needle) => items.iter().any(|item| crate::eval::values_equal(item, needle)),
        (other, _) => return Err(format!("contains() needs a string or list, got {}", other)),
    };
    Ok(Value::Bool(found))
}

fn if_else(args: &[Value]) -> FnResult {
    arity(args, 3, 3)?;
    Ok(if crate::eval::truthy(&args[0]) {
        args[1].clone()
    } else {
        args[2].clone()
    })
}

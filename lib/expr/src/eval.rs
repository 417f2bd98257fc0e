//! Tree-walking interpreter
//!
//! Every node visit is one step. The wall clock is read on the first step and
//! every [`CHECK_INTERVAL`] steps after, so a zero timeout fails immediately
//! and a long evaluation stops within one interval of its deadline.

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{ExprError, Result, SecurityViolation};
use crate::functions::{display, number, FunctionRegistry};

pub const CHECK_INTERVAL: u64 = 64;

/// Variable name to value
pub type Bindings = HashMap<String, Value>;

pub(crate) struct Interpreter<'a> {
    bindings: &'a Bindings,
    functions: &'a FunctionRegistry,
    started: Instant,
    limit: Duration,
    steps: u64,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(bindings: &'a Bindings, functions: &'a FunctionRegistry, limit: Duration) -> Self {
        Self {
            bindings,
            functions,
            started: Instant::now(),
            limit,
            steps: 0,
        }
    }

    fn tick(&mut self) -> Result<()> {
        if self.steps % CHECK_INTERVAL == 0 && self.started.elapsed() >= self.limit {
            return Err(ExprError::Timeout { limit: self.limit });
        }
        self.steps += 1;
        Ok(())
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.tick()?;
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(name) => resolve(self.bindings, name)
                .ok_or_else(|| SecurityViolation::UnboundIdentifier(name.clone()).into()),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Expr::Unary { op, expr } => {
                let v = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&v))),
                    UnaryOp::Neg => match v {
                        Value::Null => Ok(Value::Null),
                        Value::Number(n) => to_number(-n.as_f64().unwrap_or(0.0)),
                        other => Err(ExprError::eval(format!("cannot negate {}", other))),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    let l = self.eval(lhs)?;
                    if !truthy(&l) {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(truthy(&self.eval(rhs)?)))
                }
                BinaryOp::Or => {
                    let l = self.eval(lhs)?;
                    if truthy(&l) {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(truthy(&self.eval(rhs)?)))
                }
                _ => {
                    let l = self.eval(lhs)?;
                    let r = self.eval(rhs)?;
                    binary(*op, &l, &r)
                }
            },
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(cond)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { name, args } => {
                let function = self
                    .functions
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ExprError::from(SecurityViolation::UnknownFunction(name.clone())))?;
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>>>()?;
                function(&values).map_err(|message| ExprError::eval(format!("{}(): {}", name, message)))
            }
        }
    }
}

/// Look up `name`, falling back to walking a dotted name from its longest
/// bound prefix. An unreachable tail is null; no bound prefix is `None`.
pub fn resolve(bindings: &Bindings, name: &str) -> Option<Value> {
    if let Some(v) = bindings.get(name) {
        return Some(v.clone());
    }
    let mut split = name.len();
    while let Some(dot) = name[..split].rfind('.') {
        if let Some(root) = bindings.get(&name[..dot]) {
            let mut current = root;
            for segment in name[dot + 1..].split('.') {
                let next = match current {
                    Value::Object(map) => map.get(segment),
                    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                    _ => None,
                };
                match next {
                    Some(v) => current = v,
                    None => return Some(Value::Null),
                }
            }
            return Some(current.clone());
        }
        split = dot;
    }
    None
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Equality where `1` and `1.0` are the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

fn to_number(x: f64) -> Result<Value> {
    number(x).map_err(ExprError::Evaluation)
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(l, r))),
        BinaryOp::Ne => return Ok(Value::Bool(!values_equal(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (l, r) {
                (Value::Null, _) | (_, Value::Null) => return Ok(Value::Bool(false)),
                (Value::Number(x), Value::Number(y)) => {
                    x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
                }
                (Value::String(x), Value::String(y)) => x.cmp(y),
                _ => {
                    return Err(ExprError::eval(format!(
                        "cannot compare {} {} {}",
                        l, op, r
                    )))
                }
            };
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }

    if op == BinaryOp::Add && (l.is_string() || r.is_string()) {
        return Ok(Value::String(display(l) + &display(r)));
    }

    let (x, y) = match (l.as_f64(), r.as_f64()) {
        (Some(x), Some(y)) if l.is_number() && r.is_number() => (x, y),
        _ => {
            return Err(ExprError::eval(format!(
                "cannot apply '{}' to {} and {}",
                op, l, r
            )))
        }
    };

    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::Rem if y == 0.0 => {
            return Err(ExprError::eval("division by zero"));
        }
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        BinaryOp::Pow => x.powf(y),
        _ => return Err(ExprError::eval(format!("unsupported operator '{}'", op))),
    };
    to_number(result)
}

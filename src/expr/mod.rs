// src/expr/mod.rs

//! Expression evaluation for if-parts and model conditions.
//!
//! The engine only talks to the [`ExpressionEvaluator`] trait. The built-in
//! [`BuiltinEvaluator`] understands a small `${...}` language (see
//! [`parser`]); embedders can plug in their own.

pub mod parser;

use std::cmp::Ordering;
use std::fmt::Debug;

use serde_json::{Number, Value};
use thiserror::Error;
use tracing::warn;

use crate::model::Condition;
use crate::types::VariableMap;

pub use parser::{BinOp, Expr, parse_expression};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("{0}")]
    Parse(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("type error: {0}")]
    Type(String),
}

/// Layered, read-only view over variable maps. The innermost layer (plan
/// item local variables) is consulted first, the case scope last.
#[derive(Debug, Clone, Default)]
pub struct VariableScope<'a> {
    layers: Vec<&'a VariableMap>,
}

impl<'a> VariableScope<'a> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Scope consisting of a single map.
    pub fn of(variables: &'a VariableMap) -> Self {
        Self {
            layers: vec![variables],
        }
    }

    /// Append an outer layer.
    pub fn with_layer(mut self, variables: &'a VariableMap) -> Self {
        self.layers.push(variables);
        self
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.layers.iter().copied().find_map(|layer| layer.get(name))
    }
}

/// Evaluates an expression string against a variable scope.
pub trait ExpressionEvaluator: Send + Sync + Debug {
    fn evaluate(
        &self,
        expression: &str,
        scope: &VariableScope<'_>,
    ) -> Result<Value, ExpressionError>;
}

/// Evaluator for the built-in expression language.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEvaluator;

impl ExpressionEvaluator for BuiltinEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        scope: &VariableScope<'_>,
    ) -> Result<Value, ExpressionError> {
        let expr = parse_expression(expression).map_err(ExpressionError::Parse)?;
        eval(&expr, scope)
    }
}

/// Evaluate a condition; anything but a boolean `true` counts as false.
pub fn evaluate_condition(
    evaluator: &dyn ExpressionEvaluator,
    condition: &Condition,
    scope: &VariableScope<'_>,
) -> bool {
    match condition {
        Condition::Constant(value) => *value,
        Condition::Expression(expression) => evaluate_predicate(evaluator, expression, scope),
    }
}

/// Evaluate an if-part style predicate. Errors and non-boolean results are
/// logged and read as "not satisfied".
pub fn evaluate_predicate(
    evaluator: &dyn ExpressionEvaluator,
    expression: &str,
    scope: &VariableScope<'_>,
) -> bool {
    match evaluator.evaluate(expression, scope) {
        Ok(Value::Bool(value)) => value,
        Ok(other) => {
            warn!(%expression, result = %other, "condition did not evaluate to a boolean; treating as false");
            false
        }
        Err(err) => {
            warn!(%expression, error = %err, "condition evaluation failed; treating as false");
            false
        }
    }
}

fn eval(expr: &Expr, scope: &VariableScope<'_>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => lookup(segments, scope),
        Expr::Not(inner) => Ok(Value::Bool(!as_bool(&eval(inner, scope)?, "!")?)),
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if as_bool(&eval(lhs, scope)?, "||")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(as_bool(&eval(rhs, scope)?, "||")?))
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !as_bool(&eval(lhs, scope)?, "&&")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(as_bool(&eval(rhs, scope)?, "&&")?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, scope)?;
            let rhs = eval(rhs, scope)?;
            binary(*op, &lhs, &rhs)
        }
    }
}

fn lookup(segments: &[String], scope: &VariableScope<'_>) -> Result<Value, ExpressionError> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(ExpressionError::Parse("empty variable path".to_string()));
    };
    let mut current = scope
        .get(head)
        .ok_or_else(|| ExpressionError::UnknownVariable(head.clone()))?;
    for segment in rest {
        match current.get(segment.as_str()) {
            Some(next) => current = next,
            None => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}

fn as_bool(value: &Value, op: &str) -> Result<bool, ExpressionError> {
    value
        .as_bool()
        .ok_or_else(|| ExpressionError::Type(format!("operand of '{op}' is not a boolean: {value}")))
}

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(loosely_equal(lhs, rhs))),
        BinOp::Ne => Ok(Value::Bool(!loosely_equal(lhs, rhs))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(lhs, rhs)?;
            let result = match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinOp::Add => match (lhs, rhs) {
            (Value::String(a), b) => Ok(Value::String(format!("{a}{}", display_plain(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{b}", display_plain(a)))),
            _ => arithmetic(lhs, rhs, i64::checked_add, |a, b| a + b),
        },
        BinOp::Sub => arithmetic(lhs, rhs, i64::checked_sub, |a, b| a - b),
        BinOp::Or | BinOp::And => Ok(Value::Bool(match op {
            BinOp::Or => as_bool(lhs, "||")? || as_bool(rhs, "||")?,
            _ => as_bool(lhs, "&&")? && as_bool(rhs, "&&")?,
        })),
    }
}

fn display_plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loosely_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) if lhs.is_number() && rhs.is_number() => a == b,
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, ExpressionError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (number_as_f64(a), number_as_f64(b));
            a.partial_cmp(&b)
                .ok_or_else(|| ExpressionError::Type("cannot compare NaN".to_string()))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExpressionError::Type(format!("cannot compare {lhs} with {rhs}"))),
    }
}

fn number_as_f64(n: &Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

fn arithmetic(
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, ExpressionError> {
    let (Value::Number(a), Value::Number(b)) = (lhs, rhs) else {
        return Err(ExpressionError::Type(format!(
            "arithmetic needs numbers, got {lhs} and {rhs}"
        )));
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = int_op(x, y) {
            return Ok(Value::Number(Number::from(result)));
        }
    }
    let result = float_op(number_as_f64(a), number_as_f64(b));
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::Type(format!("non-finite arithmetic result {result}")))
}

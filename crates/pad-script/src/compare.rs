//! Comparison operators for `if` / `while`
//!
//! Coercion rules:
//!
//! | left \ right     | number / bool         | string                 | null  | list / mapping |
//! |------------------|-----------------------|------------------------|-------|----------------|
//! | number           | numeric (bool = 0/1)  | numeric if the string parses, else unequal | unequal | unequal |
//! | bool             | numeric (bool = 0/1)  | unequal                | unequal | unequal      |
//! | string           | (symmetric)           | lexicographic          | unequal | unequal      |
//! | null             | unequal               | unequal                | equal | unequal        |
//! | list / mapping   | unequal               | unequal                | unequal | structural equality only |
//!
//! "Unequal" pairs answer `==` with false and `!=` with true; ordering them
//! (`<`, `<=`, `>`, `>=`) is an expression error. A string is never coerced
//! to a boolean.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use pad_core::value;
use serde_json::Value;

use crate::error::{ScriptError, ScriptResult};

/// One of `== != < <= > >=`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "==" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How two values relate under the coercion table
enum Relation {
    Ordered(Ordering),
    /// Comparable for equality only
    Equality(bool),
}

fn is_numeric(v: &Value) -> bool {
    matches!(v, Value::Number(_) | Value::Bool(_))
}

fn numeric_order(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (value::as_i64(left), value::as_i64(right)) {
        return Some(a.cmp(&b));
    }
    value::as_f64(left)?.partial_cmp(&value::as_f64(right)?)
}

fn parse_numeric_string(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>().ok().and_then(value::from_f64)
}

fn relate(left: &Value, right: &Value) -> Relation {
    match (left, right) {
        (l, r) if is_numeric(l) && is_numeric(r) => match numeric_order(l, r) {
            Some(ordering) => Relation::Ordered(ordering),
            None => Relation::Equality(false),
        },
        (Value::String(s), Value::Number(_)) => match parse_numeric_string(s) {
            Some(n) => relate(&n, right),
            None => Relation::Equality(false),
        },
        (Value::Number(_), Value::String(s)) => match parse_numeric_string(s) {
            Some(n) => relate(left, &n),
            None => Relation::Equality(false),
        },
        (Value::String(a), Value::String(b)) => Relation::Ordered(a.cmp(b)),
        (Value::Null, Value::Null) => Relation::Equality(true),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            Relation::Equality(left == right)
        }
        _ => Relation::Equality(false),
    }
}

/// Evaluate `left op right`
pub fn compare(left: &Value, op: CompareOp, right: &Value) -> ScriptResult<bool> {
    match relate(left, right) {
        Relation::Ordered(ordering) => Ok(op.holds(ordering)),
        Relation::Equality(_) if op.is_ordering() => Err(ScriptError::expression(format!(
            "cannot order {} and {} with '{op}'",
            value::type_name(left),
            value::type_name(right)
        ))),
        Relation::Equality(equal) => Ok(if op == CompareOp::Eq { equal } else { !equal }),
    }
}

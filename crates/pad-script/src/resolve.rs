//! `$name` references and `=expr` values
//!
//! Every command argument passes through [`resolve`] (or [`resolve_deep`]
//! for containers) before a handler uses it.

use std::sync::OnceLock;

use pad_core::value;
use regex::Regex;
use serde_json::Value;

use crate::error::{ScriptError, ScriptResult};
use crate::expr;

/// Run variables, in insertion order
pub type Vars = indexmap::IndexMap<String, Value>;

fn index_pattern() -> ScriptResult<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = PATTERN.get() {
        return Ok(re);
    }
    let re = Regex::new(r"\[([^\]]+)\]")
        .map_err(|e| ScriptError::Internal(format!("index pattern: {e}")))?;
    Ok(PATTERN.get_or_init(|| re))
}

/// Look up a reference without its `$`: `name`, `name[0]`, `grid[1][$i]`,
/// `map[key]`
///
/// The base name must exist. Indexing past the end of a list, a missing
/// key, or indexing into a scalar yields `null`.
pub fn lookup(vars: &Vars, reference: &str) -> ScriptResult<Value> {
    let reference = reference.trim();
    let (name, indices) = match reference.find('[') {
        Some(pos) => reference.split_at(pos),
        None => (reference, ""),
    };

    let base = vars
        .get(name)
        .ok_or_else(|| ScriptError::UndefinedVariable {
            name: name.to_string(),
        })?;
    if indices.is_empty() {
        return Ok(base.clone());
    }

    let mut current = base.clone();
    for capture in index_pattern()?.captures_iter(indices) {
        let raw = capture.get(1).map_or("", |m| m.as_str()).trim();
        let key = if let Some(inner) = raw.strip_prefix('$') {
            lookup(vars, inner)?
        } else if let Ok(i) = raw.parse::<i64>() {
            Value::from(i)
        } else {
            Value::String(raw.trim_matches(|c| c == '"' || c == '\'').to_string())
        };
        current = index_into(current, &key);
        if current.is_null() {
            break;
        }
    }
    Ok(current)
}

fn index_into(container: Value, key: &Value) -> Value {
    match (container, key) {
        (Value::Array(mut items), key) => {
            let Some(i) = value::as_i64(key) else {
                return Value::Null;
            };
            let len = items.len() as i64;
            let i = if i < 0 { i + len } else { i };
            if (0..len).contains(&i) {
                items.swap_remove(i as usize)
            } else {
                Value::Null
            }
        }
        (Value::Object(mut map), Value::String(k)) => map.remove(k).unwrap_or(Value::Null),
        (Value::Object(mut map), key) => map.remove(&key.to_string()).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Resolve one argument value
///
/// - `"$ref"` becomes the referenced variable
/// - `"=expr"` is evaluated as a restricted arithmetic expression
/// - anything else is returned unchanged
pub fn resolve(vars: &Vars, raw: &Value) -> ScriptResult<Value> {
    let Value::String(s) = raw else {
        return Ok(raw.clone());
    };
    let trimmed = s.trim();
    if let Some(reference) = trimmed.strip_prefix('$') {
        return lookup(vars, reference);
    }
    if let Some(source) = trimmed.strip_prefix('=') {
        return expr::evaluate(source, &|reference| lookup(vars, reference));
    }
    Ok(raw.clone())
}

/// Resolve every scalar leaf of a nested value, keeping its shape
pub fn resolve_deep(vars: &Vars, raw: &Value) -> ScriptResult<Value> {
    match raw {
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_deep(vars, item))
            .collect::<ScriptResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_deep(vars, v)?)))
            .collect::<ScriptResult<serde_json::Map<_, _>>>()
            .map(Value::Object),
        scalar => resolve(vars, scalar),
    }
}

/// Numeric view of an already-resolved value
pub fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        other => value::as_f64(other),
    }
}

/// Resolve an argument that must be numeric
///
/// Accepts numbers, booleans (0/1), numeric strings, `$ref` and `=expr`.
pub fn resolve_number(vars: &Vars, raw: &Value) -> ScriptResult<f64> {
    let resolved = resolve(vars, raw)?;
    number_of(&resolved).ok_or_else(|| {
        ScriptError::invalid(format!(
            "expected a number but got {} {}",
            value::type_name(&resolved),
            resolved
        ))
    })
}

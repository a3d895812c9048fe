//! set, add, contains, random*, export_json, import_json

use std::path::PathBuf;

use pad_core::{value, Command, Value};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Map;
use tracing::{debug, info};

use crate::context::ExecutionContext;
use crate::error::{ScriptError, ScriptResult};
use crate::registry::Flow;

const DEFAULT_EXPORT_FILE: &str = "export.json";
const DEFAULT_IMPORT_FILE: &str = "import.json";

/// Target variable name for `set`/`add`
fn var_name(ctx: &ExecutionContext, cmd: &Command) -> ScriptResult<String> {
    let name = ctx.out_name(cmd, "var", "");
    if name.is_empty() {
        return Err(ScriptError::invalid(format!(
            "{}: 'var' must be a non-empty string",
            cmd.name()
        )));
    }
    Ok(name)
}

pub(super) fn set(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let name = var_name(ctx, cmd)?;
    let value = ctx.required(cmd, "value")?;
    debug!(var = %name, value = %value, "set");
    ctx.set_var(name, value);
    Ok(Flow::Next)
}

/// Numeric addition, or concatenation of two strings or two lists
pub(crate) fn add_values(current: Value, delta: Value) -> ScriptResult<Value> {
    match (current, delta) {
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (a, b) => {
            if let (Some(x), Some(y)) = (value::as_i64(&a), value::as_i64(&b)) {
                if let Some(sum) = x.checked_add(y) {
                    return Ok(Value::from(sum));
                }
            }
            match (value::as_f64(&a), value::as_f64(&b)) {
                (Some(x), Some(y)) => value::from_f64(x + y)
                    .ok_or_else(|| ScriptError::invalid("add: result is not finite")),
                _ => Err(ScriptError::invalid(format!(
                    "add: cannot add {} to {}",
                    value::type_name(&b),
                    value::type_name(&a)
                ))),
            }
        }
    }
}

pub(super) fn add(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let name = var_name(ctx, cmd)?;
    let current = ctx.var(&name).cloned().unwrap_or_else(|| Value::from(0));
    let delta = ctx.arg(cmd, "value", Value::from(0))?;
    let sum = add_values(current, delta)?;
    ctx.set_var(name, sum);
    Ok(Flow::Next)
}

/// Membership test; incompatible types are simply not contained
pub(crate) fn contains_value(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
        (Value::Array(items), needle) => items.contains(needle),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

pub(super) fn contains(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let needle = ctx.arg(cmd, "needle", Value::Null)?;
    let haystack = ctx.arg(cmd, "haystack", Value::Null)?;
    let out = ctx.out_name(cmd, "out", "found");
    ctx.set_var(out, Value::Bool(contains_value(&haystack, &needle)));
    Ok(Flow::Next)
}

pub(super) fn random(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let choices = match cmd.get("choices") {
        Some(raw) => match ctx.resolve_deep(raw)? {
            Value::Array(items) => items,
            other => {
                return Err(ScriptError::invalid(format!(
                    "random: choices must be a list, got {}",
                    value::type_name(&other)
                )))
            }
        },
        None => Vec::new(),
    };
    let picked = choices
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| ScriptError::invalid("random: choices list cannot be empty"))?;

    let out = ctx.out_name(cmd, "out", "random_value");
    ctx.set_var(out, picked);
    Ok(Flow::Next)
}

pub(super) fn random_range(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let min = ctx.number_arg(cmd, "min", 0.0)?;
    let max = ctx.number_arg(cmd, "max", 100.0)?;
    let integer = value::is_truthy(&ctx.arg(cmd, "integer", Value::Bool(false))?);
    if !min.is_finite() || !max.is_finite() {
        return Err(ScriptError::invalid(format!(
            "random_range: bounds must be finite, got {min} and {max}"
        )));
    }
    if min > max {
        return Err(ScriptError::invalid(format!(
            "random_range: min ({min}) cannot be greater than max ({max})"
        )));
    }
    if !integer && !(max - min).is_finite() {
        return Err(ScriptError::invalid(format!(
            "random_range: range from {min} to {max} is too wide"
        )));
    }

    let mut rng = rand::thread_rng();
    let picked = if integer {
        let (lo, hi) = (min as i64, max as i64);
        Value::from(rng.gen_range(lo..=hi))
    } else {
        value::from_f64(rng.gen_range(min..=max)).unwrap_or(Value::Null)
    };

    let out = ctx.out_name(cmd, "out", "random_value");
    ctx.set_var(out, picked);
    Ok(Flow::Next)
}

pub(super) fn random_value(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let picked: f64 = rand::thread_rng().gen();
    let out = ctx.out_name(cmd, "out", "random_value");
    ctx.set_var(out, value::from_f64(picked).unwrap_or(Value::Null));
    Ok(Flow::Next)
}

fn filename_arg(ctx: &ExecutionContext, cmd: &Command, default: &str) -> ScriptResult<PathBuf> {
    match ctx.arg(cmd, "filename", Value::from(default))? {
        Value::String(name) if !name.trim().is_empty() => Ok(PathBuf::from(name.trim())),
        other => Err(ScriptError::invalid(format!(
            "{}: filename must be a non-empty string, got {other}",
            cmd.name()
        ))),
    }
}

/// Write the listed variables (all of them when no list is given)
pub(super) fn export_json(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let path = filename_arg(ctx, cmd, DEFAULT_EXPORT_FILE)?;
    let selection = ctx.arg(cmd, "vars", Value::Null)?;

    let names: Vec<String> = match selection {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name),
                other => Err(ScriptError::invalid(format!(
                    "export_json: vars must be variable names (strings), got {other}"
                ))),
            })
            .collect::<ScriptResult<_>>()?,
        _ => Vec::new(),
    };

    let data: Map<String, Value> = if names.is_empty() {
        ctx.vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    } else {
        names
            .into_iter()
            .filter_map(|name| ctx.var(&name).cloned().map(|v| (name, v)))
            .collect()
    };

    let text = serde_json::to_string_pretty(&Value::Object(data))
        .map_err(|e| ScriptError::Internal(format!("export_json: {e}")))?;
    std::fs::write(&path, text).map_err(|source| ScriptError::Io {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "variables exported");
    Ok(Flow::Next)
}

/// Merge a JSON object's keys into the variables
pub(super) fn import_json(ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
    let path = filename_arg(ctx, cmd, DEFAULT_IMPORT_FILE)?;
    let text = std::fs::read_to_string(&path).map_err(|source| ScriptError::Io {
        path: path.clone(),
        source,
    })?;
    let data: Value = serde_json::from_str(&text).map_err(|e| {
        ScriptError::invalid(format!("import_json: invalid JSON in {}: {e}", path.display()))
    })?;
    let Value::Object(map) = data else {
        return Err(ScriptError::invalid(format!(
            "import_json: {} must contain a JSON object",
            path.display()
        )));
    };

    let count = map.len();
    for (key, value) in map {
        ctx.set_var(key, value);
    }
    info!(path = %path.display(), count, "variables imported");
    Ok(Flow::Next)
}

//! Load-time validation and jump tables
//!
//! One forward scan checks every command against the registry and pairs
//! `if`/`end_if` and `while`/`end_while` with a stack of open blocks. A
//! script that fails here never starts.

use std::collections::HashMap;

use pad_core::{blocks, Script, Value};
use pad_output::OutputBackend;
use tracing::{debug, instrument, warn};

use crate::compare::CompareOp;
use crate::error::LoadError;
use crate::registry::CommandRegistry;

/// Labels and block links for one script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JumpTable {
    /// Label name → IP of the `label` command
    pub labels: HashMap<String, usize>,
    /// `if` IP → matching `end_if` IP
    pub if_map: HashMap<usize, usize>,
    /// `while` IP → matching `end_while` IP
    pub while_to_end: HashMap<usize, usize>,
    /// `end_while` IP → matching `while` IP
    pub end_to_while: HashMap<usize, usize>,
}

/// Text form of a label name; non-string names use their JSON text
pub fn label_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Pair block openers with their end markers and index labels
pub fn build_jump_table(script: &Script) -> Result<JumpTable, LoadError> {
    let mut table = JumpTable::default();
    let mut open: Vec<(usize, &str)> = Vec::new();

    for (ip, cmd) in script.iter() {
        match cmd.name() {
            blocks::IF | blocks::WHILE => open.push((ip, cmd.name())),
            end @ (blocks::END_IF | blocks::END_WHILE) => {
                let opener = if end == blocks::END_IF {
                    blocks::IF
                } else {
                    blocks::WHILE
                };
                match open.pop() {
                    Some((start, name)) if name == opener => {
                        if opener == blocks::IF {
                            table.if_map.insert(start, ip);
                        } else {
                            table.while_to_end.insert(start, ip);
                            table.end_to_while.insert(ip, start);
                        }
                    }
                    Some((start, name)) => {
                        // Interleaved blocks: the innermost open block is not this kind
                        return Err(LoadError::UnclosedBlock {
                            ip: start,
                            command: name.to_string(),
                        });
                    }
                    None => {
                        return Err(LoadError::UnmatchedEnd {
                            ip,
                            command: end.to_string(),
                        })
                    }
                }
            }
            blocks::LABEL => {
                let Some(name) = cmd.get("name").map(label_key) else {
                    continue;
                };
                if let Some(&first) = table.labels.get(&name) {
                    return Err(LoadError::DuplicateLabel { ip, name, first });
                }
                table.labels.insert(name, ip);
            }
            _ => {}
        }
    }

    if let Some(&(ip, name)) = open.last() {
        return Err(LoadError::UnclosedBlock {
            ip,
            command: name.to_string(),
        });
    }
    Ok(table)
}

/// Validate `script` for a run on `backend` and build its jump table
///
/// Checks, in script order: known command, required keys, comparison
/// operators, and backend capabilities (when a backend is given). Literal
/// `goto` targets that name no label are only warned about here; the run
/// fails with an unknown-label error if one is reached.
#[instrument(skip_all, fields(script = %script.display_name(), commands = script.len()))]
pub fn validate(
    script: &Script,
    registry: &CommandRegistry,
    backend: Option<&dyn OutputBackend>,
) -> Result<JumpTable, LoadError> {
    for (ip, cmd) in script.iter() {
        let spec = registry
            .get(cmd.name())
            .ok_or_else(|| LoadError::UnknownCommand {
                ip,
                name: cmd.name().to_string(),
            })?;

        if let Some(key) = spec.required_keys.iter().copied().find(|key| !cmd.has(key)) {
            return Err(LoadError::MissingKey {
                ip,
                command: cmd.name().to_string(),
                key,
            });
        }

        if matches!(cmd.name(), blocks::IF | blocks::WHILE) {
            let op = cmd.get("op").map(label_key).unwrap_or_default();
            if op.parse::<CompareOp>().is_err() {
                return Err(LoadError::InvalidOperator { ip, op });
            }
        }

        if let (Some(capability), Some(backend)) = (spec.capability, backend) {
            if !backend.supports(capability) {
                return Err(LoadError::Unsupported {
                    ip,
                    command: cmd.name().to_string(),
                    backend: backend.name(),
                    capability,
                });
            }
        }
    }

    let table = build_jump_table(script)?;

    for (ip, cmd) in script.iter().filter(|(_, c)| c.name() == "goto") {
        if let Some(label) = cmd.str_arg("label") {
            if !label.starts_with('$') && !table.labels.contains_key(label) {
                warn!(ip, label, "goto targets a label that is not defined");
            }
        }
    }

    debug!(
        labels = table.labels.len(),
        ifs = table.if_map.len(),
        loops = table.while_to_end.len(),
        "script validated"
    );
    Ok(table)
}

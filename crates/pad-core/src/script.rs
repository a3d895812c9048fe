//! Script definition
//!
//! A Script is the flat, ordered list of commands read from a script file.
//! Block structure (`if`/`while`) is implied by matching end markers, never
//! by nesting, so the list is kept exactly as written.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::Command;

/// Old command names still found in saved scripts, with their replacements
const LEGACY_NAMES: &[(&str, &str)] = &[
    ("set_circle_pad", "set_left_stick"),
    ("reset_circle_pad", "reset_left_stick"),
    ("set_c_stick", "set_right_stick"),
    ("reset_c_stick", "reset_right_stick"),
    ("run_python", "run_external"),
];

/// Errors raised while reading a script file
#[derive(Debug, Error)]
pub enum ScriptParseError {
    #[error("failed to read script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("script must be a list of command objects")]
    NotAList,

    #[error("command at index {ip} must be an object with a string 'cmd'")]
    NotAnObject { ip: usize },
}

/// A loaded script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    /// Where the script was read from (if from a file)
    pub source: Option<PathBuf>,

    commands: Vec<Command>,
}

impl Script {
    /// Create from an already-built command list
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            source: None,
            commands,
        }
    }

    /// Read and parse a script file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptParseError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ScriptParseError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut script = Self::from_json_str(&content)?;
        script.source = Some(path.to_path_buf());
        Ok(script)
    }

    /// Parse a script from JSON text
    pub fn from_json_str(content: &str) -> Result<Self, ScriptParseError> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value)
    }

    /// Build a script from a JSON value, renaming legacy command names
    pub fn from_value(value: Value) -> Result<Self, ScriptParseError> {
        let Value::Array(items) = value else {
            return Err(ScriptParseError::NotAList);
        };

        let mut commands = Vec::with_capacity(items.len());
        for (ip, item) in items.into_iter().enumerate() {
            let has_name = item
                .as_object()
                .and_then(|obj| obj.get("cmd"))
                .is_some_and(Value::is_string);
            if !has_name {
                return Err(ScriptParseError::NotAnObject { ip });
            }

            let mut command: Command =
                serde_json::from_value(item).map_err(|_| ScriptParseError::NotAnObject { ip })?;
            if let Some((_, new)) = LEGACY_NAMES.iter().find(|(old, _)| *old == command.cmd) {
                debug!(ip, old = %command.cmd, new = %new, "Renaming legacy command");
                command.cmd = (*new).to_string();
            }
            commands.push(command);
        }

        Ok(Self::new(commands))
    }

    /// Get display name
    pub fn display_name(&self) -> String {
        self.source
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<inline>".to_string())
    }

    /// Command at an instruction pointer
    pub fn get(&self, ip: usize) -> Option<&Command> {
        self.commands.get(ip)
    }

    /// All commands in order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Iterate over (ip, command) pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Command)> {
        self.commands.iter().enumerate()
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the script has no commands
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl FromIterator<Command> for Script {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

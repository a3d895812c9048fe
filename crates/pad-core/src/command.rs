//! A single script command

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step of a script
///
/// A command is a JSON object with a required `cmd` name; every other key
/// is a command-specific argument. Its position in the script is its
/// instruction pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name (e.g., "press", "while")
    pub cmd: String,

    /// Command-specific arguments, raw (unresolved)
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl Command {
    /// Create a command with no arguments
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args: Map::new(),
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.cmd
    }

    /// Raw argument value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// Whether the argument is present
    pub fn has(&self, key: &str) -> bool {
        self.args.contains_key(key)
    }

    /// Raw argument as a trimmed string slice, if it is a string
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str).map(str::trim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_from_json() {
        let cmd: Command =
            serde_json::from_value(json!({"cmd": "press", "buttons": ["A"], "ms": 80})).unwrap();

        assert_eq!(cmd.name(), "press");
        assert_eq!(cmd.get("ms"), Some(&json!(80)));
        assert!(cmd.has("buttons"));
        assert!(!cmd.has("cmd"));
    }

    #[test]
    fn test_command_roundtrips_flat() {
        let cmd = Command::new("set").with_arg("var", "x").with_arg("value", 5);
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value, json!({"cmd": "set", "var": "x", "value": 5}));
    }

    #[test]
    fn test_str_arg_trims() {
        let cmd = Command::new("goto").with_arg("label", "  top ");
        assert_eq!(cmd.str_arg("label"), Some("top"));
        assert_eq!(cmd.str_arg("missing"), None);
    }
}

//! YAML loader with custom tag support
//!
//! - `!include path` - Include another YAML file, relative to the including file
//! - `!env_var VAR [default]` - Environment variable substitution

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader that expands `!include` and `!env_var`
pub struct YamlLoader {
    /// Base directory for resolving relative paths
    base_dir: PathBuf,
    /// Files currently being loaded, for cycle detection
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            include_stack: HashSet::new(),
        }
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!(path = %path.display(), "Loading YAML file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let v = self.process_value(v, source_path)?;
                    result.insert(k, v);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            _ => Ok(value),
        }
    }

    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, value = ?tagged.value, "Processing tag");

        match tag.as_str() {
            "!include" => {
                let include_path = self.value_to_path(&tagged.value, source_path)?;
                if !include_path.exists() {
                    return Err(ConfigError::IncludeNotFound { path: include_path });
                }
                debug!(path = %include_path.display(), "Including file");
                self.load_file(&include_path)
            }
            "!env_var" => process_env_var(tagged.value),
            _ => {
                // Unknown tag, keep it but process the inner value
                let value = self.process_value(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    /// Convert a YAML value to a path, relative to the source file
    fn value_to_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(path_str) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{value:?}"),
                reason: "path must be a string".to_string(),
            });
        };

        let path = Path::new(path_str.trim());
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let base_dir = source_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(&self.base_dir);
        Ok(base_dir.join(path))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// `!env_var NAME` or `!env_var NAME default text`
fn process_env_var(value: Value) -> ConfigResult<Value> {
    let spec = match value {
        Value::String(spec) => spec,
        other => {
            return Err(ConfigError::EnvVarSyntax {
                found: format!("{other:?}"),
            })
        }
    };

    let spec = spec.trim();
    let (name, default) = match spec.split_once(char::is_whitespace) {
        Some((name, default)) => (name, Some(default.trim())),
        None => (spec, None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => {
            debug!(var = name, "Substituted env var");
            Ok(Value::String(value))
        }
        (Err(_), Some(default)) => {
            debug!(var = name, "Env var not set, using default");
            // Parse the default so `!env_var PORT 4950` stays numeric
            Ok(serde_yaml::from_str(default).unwrap_or_else(|_| Value::String(default.to_string())))
        }
        (Err(_), None) => Err(ConfigError::EnvVarNotFound {
            var: name.to_string(),
        }),
    }
}

/// Load a YAML file with tag processing, relative to `base_dir`
pub fn load_yaml(base_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(base_dir).load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn get<'a>(value: &'a Value, key: &str) -> &'a Value {
        value.get(key).unwrap_or_else(|| panic!("missing key {key}"))
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "parts/backend.yaml", "kind: serial\nextra: !include more.yaml\n");
        write_file(dir.path(), "parts/more.yaml", "device: /dev/ttyUSB0\n");
        write_file(dir.path(), "main.yaml", "backend: !include parts/backend.yaml\n");

        let value = load_yaml(dir.path(), "main.yaml").unwrap();
        let backend = get(&value, "backend");
        assert_eq!(get(backend, "kind").as_str(), Some("serial"));
        assert_eq!(get(get(backend, "extra"), "device").as_str(), Some("/dev/ttyUSB0"));
    }

    fn err_text(loader: &mut YamlLoader, yaml: &str) -> String {
        loader
            .load_string(yaml, Path::new("inline.yaml"))
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn test_missing_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "main.yaml", "a: !include nope.yaml\n");
        assert!(matches!(
            load_yaml(dir.path(), "main.yaml"),
            Err(ConfigError::IncludeNotFound { .. })
        ));
    }

    #[test]
    fn test_circular_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "a: !include a.yaml\n");
        assert!(matches!(
            load_yaml(dir.path(), "a.yaml"),
            Err(ConfigError::CircularInclude { .. })
        ));
    }

    #[test]
    fn test_env_var_with_and_without_default() {
        std::env::set_var("PAD_CONFIG_TEST_HOST", "10.0.0.7");
        let mut loader = YamlLoader::new(".");
        let value = loader
            .load_string(
                "host: !env_var PAD_CONFIG_TEST_HOST\nport: !env_var PAD_CONFIG_TEST_UNSET_PORT 4950\n",
                Path::new("inline.yaml"),
            )
            .unwrap();
        assert_eq!(get(&value, "host").as_str(), Some("10.0.0.7"));
        assert_eq!(get(&value, "port").as_u64(), Some(4950));

        let err = loader
            .load_string("x: !env_var PAD_CONFIG_TEST_UNSET\n", Path::new("inline.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound { var } if var == "PAD_CONFIG_TEST_UNSET"));
        assert_eq!(
            err_text(&mut loader, "x: !env_var PAD_CONFIG_TEST_UNSET\n"),
            "`!env_var PAD_CONFIG_TEST_UNSET` is unset and has no default"
        );

        let err = loader
            .load_string("x: !env_var [1, 2]\n", Path::new("inline.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarSyntax { .. }));
    }

    #[test]
    fn test_unknown_tag_is_kept() {
        let mut loader = YamlLoader::new(".");
        let value = loader
            .load_string("x: !custom 3\n", Path::new("inline.yaml"))
            .unwrap();
        assert!(matches!(get(&value, "x"), Value::Tagged(_)));
    }
}

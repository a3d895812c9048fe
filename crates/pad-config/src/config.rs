//! Typed padscript configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{ConfigError, ConfigResult, Section};
use crate::loader::YamlLoader;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "padscript.yaml";

/// Default line speed of the 3-byte serial adapter
pub const DEFAULT_SERIAL_BAUD: u32 = 1_000_000;

/// Default line speed of PABotBase firmware
pub const DEFAULT_PABOTBASE_BAUD: u32 = 115_200;

/// Default 3DS input-redirection port
pub const DEFAULT_THREEDS_PORT: u16 = 4950;

/// Which output backend drives the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "serial")]
    Serial,
    #[serde(rename = "pabotbase")]
    PaBotBase,
    #[serde(rename = "threeds")]
    ThreeDs,
    #[default]
    #[serde(rename = "dry_run")]
    DryRun,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendKind::Serial => "serial",
            BackendKind::PaBotBase => "pabotbase",
            BackendKind::ThreeDs => "threeds",
            BackendKind::DryRun => "dry_run",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Serial device node
    pub device: Option<PathBuf>,
    /// Serial line speed; the backend's default when unset
    pub baud: Option<u32>,
    /// Keep-alive resend interval
    pub keepalive_ms: u64,
    /// Neutral warm-up after a serial connect
    pub warmup_ms: u64,
    /// 3DS address
    pub host: Option<String>,
    pub port: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            device: None,
            baud: None,
            keepalive_ms: 50,
            warmup_ms: 1000,
            host: None,
            port: DEFAULT_THREEDS_PORT,
        }
    }
}

impl BackendConfig {
    pub fn baud(&self) -> u32 {
        self.baud.unwrap_or(match self.kind {
            BackendKind::PaBotBase => DEFAULT_PABOTBASE_BAUD,
            _ => DEFAULT_SERIAL_BAUD,
        })
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

/// External script runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    /// Relative script paths resolve here
    pub dir: PathBuf,
    pub interpreter: String,
    pub timeout_s: f64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("py_scripts"),
            interpreter: "python3".to_string(),
            timeout_s: 10.0,
        }
    }
}

impl ExternalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_s).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Root of `padscript.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PadConfig {
    pub backend: BackendConfig,
    pub external: ExternalConfig,
    pub logging: LoggingConfig,
}

impl PadConfig {
    /// Load `path`, or the defaults when the file does not exist
    ///
    /// A relative `external.dir` is resolved against the file's directory.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No configuration file, using defaults");
            return Ok(Self::default());
        }

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file = path.file_name().map(Path::new).unwrap_or(path);
        let value = YamlLoader::new(&base_dir).load_file(file)?;
        let mut config = Self::from_value(value, path)?;

        if config.external.dir.is_relative() {
            config.external.dir = base_dir.join(&config.external.dir);
        }
        debug!(backend = %config.backend.kind, "Configuration loaded");
        Ok(config)
    }

    /// Parse a configuration from YAML text (tags expanded relative to `.`)
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let source = Path::new(DEFAULT_CONFIG_FILE);
        let value = YamlLoader::new(".").load_string(content, source)?;
        Self::from_value(value, source)
    }

    fn from_value(value: serde_yaml::Value, source: &Path) -> ConfigResult<Self> {
        // An empty document is the defaults
        if value.is_null() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_value(value).map_err(|e| ConfigError::Schema {
            path: source.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let backend = &self.backend;
        match backend.kind {
            BackendKind::Serial | BackendKind::PaBotBase if backend.device.is_none() => {
                return Err(invalid(Section::Backend, "device", "required for serial devices"));
            }
            BackendKind::Serial | BackendKind::PaBotBase if backend.baud == Some(0) => {
                return Err(invalid(Section::Backend, "baud", "must be greater than zero"));
            }
            BackendKind::ThreeDs
                if backend.host.as_deref().map_or(true, |h| h.trim().is_empty()) =>
            {
                return Err(invalid(Section::Backend, "host", "required for the threeds backend"));
            }
            BackendKind::ThreeDs if backend.port == 0 => {
                return Err(invalid(Section::Backend, "port", "must be non-zero"));
            }
            _ => {}
        }
        if backend.kind != BackendKind::DryRun && backend.keepalive_ms == 0 {
            return Err(invalid(Section::Backend, "keepalive_ms", "must be greater than zero"));
        }
        if !self.external.timeout_s.is_finite() || self.external.timeout_s <= 0.0 {
            return Err(invalid(Section::External, "timeout_s", "must be a positive number of seconds"));
        }
        if self.external.interpreter.trim().is_empty() {
            return Err(invalid(Section::External, "interpreter", "must not be empty"));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(invalid(Section::Logging, "filter", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(section: Section, field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        section,
        field,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PadConfig::from_yaml_str("").unwrap();
        assert_eq!(config, PadConfig::default());
        assert_eq!(config.backend.kind, BackendKind::DryRun);
        assert_eq!(config.backend.keepalive(), Duration::from_millis(50));
        assert_eq!(config.external.timeout(), Duration::from_secs(10));
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_serial_backend() {
        let config = PadConfig::from_yaml_str(
            "backend:\n  kind: serial\n  device: /dev/ttyACM0\n  warmup_ms: 250\n",
        )
        .unwrap();
        assert_eq!(config.backend.kind, BackendKind::Serial);
        assert_eq!(config.backend.device, Some(PathBuf::from("/dev/ttyACM0")));
        assert_eq!(config.backend.warmup(), Duration::from_millis(250));
        assert_eq!(config.backend.keepalive_ms, 50);
        assert_eq!(config.backend.baud(), DEFAULT_SERIAL_BAUD);

        let config = PadConfig::from_yaml_str(
            "backend:\n  kind: serial\n  device: /dev/ttyUSB0\n  baud: 115200\n",
        )
        .unwrap();
        assert_eq!(config.backend.baud(), 115_200);
    }

    #[test]
    fn test_pabotbase_backend() {
        let config =
            PadConfig::from_yaml_str("backend:\n  kind: pabotbase\n  device: /dev/ttyACM0\n").unwrap();
        assert_eq!(config.backend.kind, BackendKind::PaBotBase);
        assert_eq!(config.backend.kind.to_string(), "pabotbase");
        assert_eq!(config.backend.baud(), DEFAULT_PABOTBASE_BAUD);
    }

    #[test]
    fn test_threeds_backend() {
        let config =
            PadConfig::from_yaml_str("backend:\n  kind: threeds\n  host: 192.168.1.20\n").unwrap();
        assert_eq!(config.backend.kind, BackendKind::ThreeDs);
        assert_eq!(config.backend.port, DEFAULT_THREEDS_PORT);
    }

    #[test]
    fn test_validation_errors() {
        for (yaml, key) in [
            ("backend:\n  kind: serial\n", "backend.device"),
            ("backend:\n  kind: pabotbase\n", "backend.device"),
            ("backend:\n  kind: threeds\n", "backend.host"),
            ("backend:\n  kind: threeds\n  host: ' '\n", "backend.host"),
            (
                "backend:\n  kind: serial\n  device: /dev/x\n  keepalive_ms: 0\n",
                "backend.keepalive_ms",
            ),
            ("backend:\n  kind: serial\n  device: /dev/x\n  baud: 0\n", "backend.baud"),
            ("external:\n  timeout_s: 0\n", "external.timeout_s"),
            ("logging:\n  filter: ''\n", "logging.filter"),
        ] {
            match PadConfig::from_yaml_str(yaml) {
                Err(e @ ConfigError::InvalidValue { .. }) => {
                    assert_eq!(e.key().as_deref(), Some(key), "{yaml}");
                    assert!(e.to_string().starts_with(key), "{e}");
                }
                other => panic!("expected InvalidValue for {yaml:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_schema_errors() {
        assert!(matches!(
            PadConfig::from_yaml_str("backend:\n  kind: bluetooth\n"),
            Err(ConfigError::Schema { .. })
        ));
        assert!(matches!(
            PadConfig::from_yaml_str("backnd: {}\n"),
            Err(ConfigError::Schema { .. })
        ));
    }
}

//! Configuration for padscript
//!
//! `padscript.yaml` is read through a tag-expanding YAML loader:
//!
//! - `!include path` - Include another YAML file
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! and deserialized into [`PadConfig`]. A missing file yields the defaults
//! (dry-run backend, `python3` for external scripts, `info` logging).
//!
//! # Example
//!
//! ```ignore
//! use pad_config::PadConfig;
//!
//! let config = PadConfig::load("padscript.yaml")?;
//! println!("backend: {}", config.backend.kind);
//! ```

mod config;
mod error;
mod loader;

pub use config::{
    BackendConfig, BackendKind, ExternalConfig, LoggingConfig, PadConfig, DEFAULT_CONFIG_FILE,
    DEFAULT_PABOTBASE_BAUD, DEFAULT_SERIAL_BAUD, DEFAULT_THREEDS_PORT,
};
pub use error::{ConfigError, ConfigResult, Section};
pub use loader::{load_yaml, YamlLoader};

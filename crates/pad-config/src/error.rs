//! Why a `padscript.yaml` could not be turned into a [`PadConfig`]
//!
//! [`PadConfig`]: crate::PadConfig

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level block of `padscript.yaml`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Backend,
    External,
    Logging,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Section::Backend => "backend",
            Section::External => "external",
            Section::Logging => "logging",
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not YAML at all
    #[error("{path} is not valid YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Valid YAML with unknown keys, a bad backend kind or mistyped fields
    #[error("{path} does not describe a padscript config: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("`!include {path}` rejected: {reason}")]
    InvalidIncludePath { path: String, reason: String },

    #[error("`!include` target {path} does not exist")]
    IncludeNotFound { path: PathBuf },

    /// A file reached again through its own includes
    #[error("{path} includes itself")]
    CircularInclude { path: PathBuf },

    #[error("`!env_var` needs a variable name, got {found}")]
    EnvVarSyntax { found: String },

    #[error("`!env_var {var}` is unset and has no default")]
    EnvVarNotFound { var: String },

    /// A field that parsed but cannot drive a run
    #[error("{section}.{field}: {reason}")]
    InvalidValue {
        section: Section,
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    /// Dotted key of an [`ConfigError::InvalidValue`], such as `backend.device`
    pub fn key(&self) -> Option<String> {
        match self {
            ConfigError::InvalidValue { section, field, .. } => Some(format!("{section}.{field}")),
            _ => None,
        }
    }
}

//! Load and runtime errors

use std::path::PathBuf;

use pad_core::{RunId, ScriptParseError};
use pad_output::{BackendError, Capability};
use thiserror::Error;

use crate::external::ExternalError;

/// A script that cannot run at all
///
/// Every variant names the instruction pointer of the offending command.
/// Raised before any side effect occurs.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Parse(#[from] ScriptParseError),

    #[error("#{ip}: unknown command '{name}'")]
    UnknownCommand { ip: usize, name: String },

    #[error("#{ip} ({command}): missing required key '{key}'")]
    MissingKey {
        ip: usize,
        command: String,
        key: &'static str,
    },

    #[error("#{ip}: '{command}' without a matching opener")]
    UnmatchedEnd { ip: usize, command: String },

    #[error("#{ip}: '{command}' is never closed")]
    UnclosedBlock { ip: usize, command: String },

    #[error("#{ip}: duplicate label '{name}' (first defined at #{first})")]
    DuplicateLabel {
        ip: usize,
        name: String,
        first: usize,
    },

    #[error("#{ip}: invalid comparison operator '{op}'")]
    InvalidOperator { ip: usize, op: String },

    #[error("#{ip} ({command}): {capability} not supported by the {backend} backend")]
    Unsupported {
        ip: usize,
        command: String,
        backend: &'static str,
        capability: Capability,
    },
}

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("undefined variable: ${name}")]
    UndefinedVariable { name: String },

    #[error("expression error: {0}")]
    Expression(String),

    #[error("unknown label: {label}")]
    UnknownLabel { label: String },

    #[error("{command}: no output backend connected")]
    BackendUnavailable { command: String },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("external script failed: {0}")]
    External(#[from] ExternalError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run {run_id} is already active")]
    AlreadyRunning { run_id: RunId },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScriptError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ScriptError::InvalidArgument(message.into())
    }

    pub(crate) fn expression(message: impl Into<String>) -> Self {
        ScriptError::Expression(message.into())
    }
}

/// Result type for script execution
pub type ScriptResult<T> = Result<T, ScriptError>;

//! Core types for padscript
//!
//! This crate provides the fundamental types shared by the interpreter,
//! the output backends and the command-line runner: [`Command`],
//! [`Script`], [`RunId`] and a handful of JSON value helpers.

mod command;
mod context;
mod script;
pub mod value;

pub use command::Command;
pub use context::RunId;
pub use script::{Script, ScriptParseError};

/// Re-export of the dynamic value type used for arguments and variables
pub use serde_json::{Map, Value};

/// Names of the commands that open and close blocks
pub mod blocks {
    /// Opens a conditional block
    pub const IF: &str = "if";
    /// Closes a conditional block
    pub const END_IF: &str = "end_if";
    /// Opens a loop block
    pub const WHILE: &str = "while";
    /// Closes a loop block
    pub const END_WHILE: &str = "end_while";
    /// Jump target
    pub const LABEL: &str = "label";
}

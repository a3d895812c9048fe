//! Command registry
//!
//! A table from command name to [`CommandSpec`], built once before any run.
//! Each spec carries the required argument keys checked at load, the
//! handler, and metadata for listings and the code exporter.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use pad_core::Command;
use pad_output::Capability;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::error::ScriptResult;

/// Where execution continues after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The next command (`ip + 1`)
    Next,
    /// An explicit instruction pointer
    Jump(usize),
}

/// The single invoke contract every command implements
pub trait CommandHandler: Send + Sync {
    fn invoke(&self, ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow>;
}

impl<F> CommandHandler for F
where
    F: Fn(&mut ExecutionContext, &Command) -> ScriptResult<Flow> + Send + Sync,
{
    fn invoke(&self, ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
        self(ctx, cmd)
    }
}

/// Listing groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandGroup {
    Meta,
    Timing,
    Controller,
    Control,
    Variables,
    Image,
    External,
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandGroup::Meta => "Meta",
            CommandGroup::Timing => "Timing",
            CommandGroup::Controller => "Controller",
            CommandGroup::Control => "Control",
            CommandGroup::Variables => "Variables",
            CommandGroup::Image => "Image",
            CommandGroup::External => "External",
        })
    }
}

/// Registry entry for one command
#[derive(Clone)]
pub struct CommandSpec {
    /// Command name as written in scripts
    pub name: &'static str,
    /// Keys that must be present on every use
    pub required_keys: &'static [&'static str],
    /// Backend feature the command needs, if any
    pub capability: Option<Capability>,
    /// Whether the code exporter can translate this command
    pub exportable: bool,
    pub group: CommandGroup,
    /// One-line description
    pub doc: &'static str,
    handler: Arc<dyn CommandHandler>,
}

impl CommandSpec {
    pub fn new(
        name: &'static str,
        group: CommandGroup,
        required_keys: &'static [&'static str],
        handler: impl CommandHandler + 'static,
    ) -> Self {
        Self {
            name,
            required_keys,
            capability: None,
            exportable: true,
            group,
            doc: "",
            handler: Arc::new(handler),
        }
    }

    pub fn doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn not_exportable(mut self) -> Self {
        self.exportable = false;
        self
    }

    pub fn invoke(&self, ctx: &mut ExecutionContext, cmd: &Command) -> ScriptResult<Flow> {
        self.handler.invoke(ctx, cmd)
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("required_keys", &self.required_keys)
            .field("capability", &self.capability)
            .field("exportable", &self.exportable)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Name → spec table
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    specs: IndexMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in command
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::handlers::register_builtins(&mut registry);
        registry
    }

    /// Add or replace a command
    pub fn register(&mut self, spec: CommandSpec) {
        debug!(command = spec.name, group = %spec.group, "Registering command");
        self.specs.insert(spec.name, spec);
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Specs in registration order
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.values()
    }

    /// Specs grouped for display, registration order within each group
    pub fn grouped(&self) -> Vec<(CommandGroup, Vec<&CommandSpec>)> {
        let mut groups: IndexMap<CommandGroup, Vec<&CommandSpec>> = IndexMap::new();
        for spec in self.specs.values() {
            groups.entry(spec.group).or_default().push(spec);
        }
        groups.sort_keys();
        groups.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

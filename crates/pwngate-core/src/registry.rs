//! The set of registered commands.
//!
//! Registration happens once, while the extension loads. After that the
//! registry is only read: the dispatcher looks names up and the help listing
//! walks it in registration order.

use crate::args::{ArgumentPipeline, ArgumentSpec};
use crate::dispatch::CommandContext;
use crate::error::RegistryError;
use crate::gates::{Gate, GateChain};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Host built-ins an extension command is allowed to shadow.
pub const BUILTIN_OVERRIDE_WHITELIST: &[&str] = &["up", "down", "search", "pwd", "start", "ignore"];

pub type CommandBody = Box<dyn Fn(&mut CommandContext<'_>) -> anyhow::Result<()>>;

pub struct CommandDescriptor {
    name: String,
    aliases: Vec<String>,
    category: String,
    gates: GateChain,
    arguments: ArgumentPipeline,
    requires_heap: bool,
    body: CommandBody,
}

impl CommandDescriptor {
    pub fn new<F>(name: &str, spec: ArgumentSpec, body: F) -> Self
    where
        F: Fn(&mut CommandContext<'_>) -> anyhow::Result<()> + 'static,
    {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            category: "Misc".to_string(),
            gates: GateChain::new(),
            arguments: ArgumentPipeline::new(name, spec),
            requires_heap: false,
            body: Box::new(body),
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn gate(mut self, gate: Gate) -> Self {
        self.gates.push(gate);
        self
    }

    /// Run the body only under a resolved heap strategy.
    pub fn requires_resolved_heap(mut self) -> Self {
        self.requires_heap = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn category_name(&self) -> &str {
        &self.category
    }

    pub fn description(&self) -> &str {
        &self.arguments.spec().description
    }

    pub fn gates(&self) -> &GateChain {
        &self.gates
    }

    pub fn arguments(&self) -> &ArgumentPipeline {
        &self.arguments
    }

    pub fn needs_heap(&self) -> bool {
        self.requires_heap
    }

    pub(crate) fn call(&self, ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        (self.body)(ctx)
    }

    fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("category", &self.category)
            .field("gates", &self.gates)
            .field("requires_heap", &self.requires_heap)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
struct NameEntry {
    index: usize,
    is_alias: bool,
}

#[derive(Debug, Default)]
pub struct Registry {
    builtins: BTreeSet<String>,
    commands: Vec<CommandDescriptor>,
    names: HashMap<String, NameEntry>,
}

impl Registry {
    pub fn new(builtins: BTreeSet<String>) -> Self {
        Self {
            builtins,
            ..Self::default()
        }
    }

    /// Build from the host's "help all" listing.
    pub fn from_builtin_listing(listing: &str) -> Self {
        Self::new(parse_builtin_listing(listing))
    }

    /// Register a command and all of its aliases, or nothing at all.
    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<(), RegistryError> {
        let mut claimed: BTreeSet<&str> = BTreeSet::new();
        for name in descriptor.all_names() {
            if self.names.contains_key(name) || !claimed.insert(name) {
                tracing::warn!(command = name, "rejected duplicate command");
                return Err(RegistryError::DuplicateCommand(name.to_string()));
            }
            if self.builtins.contains(name) && !BUILTIN_OVERRIDE_WHITELIST.contains(&name) {
                tracing::warn!(command = name, "rejected built-in override");
                return Err(RegistryError::BuiltinOverride(name.to_string()));
            }
        }

        let index = self.commands.len();
        for name in descriptor.all_names() {
            let is_alias = name != descriptor.name;
            self.names
                .insert(name.to_string(), NameEntry { index, is_alias });
        }
        tracing::debug!(command = %descriptor.name, aliases = ?descriptor.aliases, "registered command");
        self.commands.push(descriptor);
        Ok(())
    }

    /// The descriptor bound to `name`, and whether `name` is an alias.
    pub fn lookup(&self, name: &str) -> Option<(&CommandDescriptor, bool)> {
        let entry = self.names.get(name)?;
        Some((&self.commands[entry.index], entry.is_alias))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Commands in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.iter()
    }

    pub fn by_category(&self) -> BTreeMap<&str, Vec<&CommandDescriptor>> {
        let mut out: BTreeMap<&str, Vec<&CommandDescriptor>> = BTreeMap::new();
        for cmd in &self.commands {
            out.entry(cmd.category_name()).or_default().push(cmd);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Command names from a host "help all" listing: the first word of every line
/// that is neither blank nor a class header.
pub fn parse_builtin_listing(listing: &str) -> BTreeSet<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| {
            !l.is_empty()
                && !l.starts_with("Command class:")
                && !l.starts_with("Unclassified commands")
        })
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

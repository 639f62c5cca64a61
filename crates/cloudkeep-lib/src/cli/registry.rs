use clap::Command;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{CloudKeepError, Result};

/// Groups shown in the command listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandCategory {
    Accounts,
    Providers,
    Utility,
}

impl CommandCategory {
    /// Returns all category variants in display order.
    pub fn all() -> &'static [CommandCategory] {
        &[
            CommandCategory::Accounts,
            CommandCategory::Providers,
            CommandCategory::Utility,
        ]
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandCategory::Accounts => write!(f, "accounts"),
            CommandCategory::Providers => write!(f, "providers"),
            CommandCategory::Utility => write!(f, "utility"),
        }
    }
}

/// Metadata for a registered command.
#[derive(Debug, Clone)]
pub struct CommandMeta {
    pub name: String,
    pub category: CommandCategory,
    pub description: String,
    pub aliases: Vec<String>,
    pub command: Command,
}

#[derive(Debug, Serialize)]
struct CommandJsonEntry<'a> {
    name: &'a str,
    description: &'a str,
    aliases: &'a [String],
}

/// Registered top-level commands, keyed by name.
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandMeta>,
    root: Command,
}

impl CommandRegistry {
    pub fn new(root: Command) -> Self {
        Self {
            commands: BTreeMap::new(),
            root,
        }
    }

    /// Registers a command. Names and aliases must be unique.
    pub fn register(&mut self, meta: CommandMeta) -> Result<()> {
        if self.resolve(&meta.name).is_some() {
            return Err(CloudKeepError::Command(format!(
                "duplicate command name: {}",
                meta.name
            )));
        }
        if let Some(alias) = meta.aliases.iter().find(|a| self.resolve(a).is_some()) {
            return Err(CloudKeepError::Command(format!(
                "alias {alias} of {} is already taken",
                meta.name
            )));
        }
        self.commands.insert(meta.name.clone(), meta);
        Ok(())
    }

    /// Look a command up by name or alias.
    pub fn resolve(&self, name: &str) -> Option<&CommandMeta> {
        self.commands.get(name).or_else(|| {
            self.commands
                .values()
                .find(|m| m.aliases.iter().any(|a| a == name))
        })
    }

    /// Commands in `cat`, sorted by name.
    pub fn get_by_category(&self, cat: CommandCategory) -> Vec<&CommandMeta> {
        self.commands.values().filter(|m| m.category == cat).collect()
    }

    /// Human-readable listing grouped by category.
    pub fn render_listing(&self) -> String {
        let mut out = String::new();
        for cat in CommandCategory::all() {
            let cmds = self.get_by_category(*cat);
            if cmds.is_empty() {
                continue;
            }
            out.push_str(&format!("{cat}:\n"));
            for cmd in cmds {
                out.push_str(&format!("  {:<12} {}\n", cmd.name, cmd.description));
            }
        }
        out
    }

    /// JSON listing grouped by category.
    pub fn render_listing_json(&self) -> Result<String> {
        let mut output: BTreeMap<String, Vec<CommandJsonEntry<'_>>> = BTreeMap::new();
        for cat in CommandCategory::all() {
            let entries: Vec<_> = self
                .get_by_category(*cat)
                .into_iter()
                .map(|m| CommandJsonEntry {
                    name: &m.name,
                    description: &m.description,
                    aliases: &m.aliases,
                })
                .collect();
            if !entries.is_empty() {
                output.insert(cat.to_string(), entries);
            }
        }
        Ok(serde_json::to_string_pretty(&output)?)
    }

    /// Consumes the registry and builds the final clap Command with all subcommands attached.
    pub fn build_root(self) -> Command {
        self.commands
            .into_values()
            .fold(self.root, |root, meta| root.subcommand(meta.command))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sorted names of all registered commands.
    pub fn command_names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }
}

/// Builder for constructing `CommandMeta` instances.
pub struct CommandBuilder {
    category: CommandCategory,
    command: Command,
}

impl CommandBuilder {
    /// Wraps a clap command; name, description and aliases are read from it.
    pub fn from_clap(command: Command) -> Self {
        Self {
            category: CommandCategory::Utility,
            command,
        }
    }

    pub fn category(mut self, cat: CommandCategory) -> Self {
        self.category = cat;
        self
    }

    pub fn build(self) -> CommandMeta {
        let description = self
            .command
            .get_about()
            .map(|s| s.to_string())
            .unwrap_or_default();
        CommandMeta {
            name: self.command.get_name().to_string(),
            category: self.category,
            description,
            aliases: self
                .command
                .get_visible_aliases()
                .map(str::to_string)
                .collect(),
            command: self.command,
        }
    }
}

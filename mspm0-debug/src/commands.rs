//! Device specific monitor commands.

use std::io::Write;

use crate::memory::{MemoryError, MemoryInterface};

/// An error returned by a device command.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum CommandError {
    /// Unknown command '{0}'.
    UnknownCommand(String),
    /// The command could not access target memory.
    Memory(#[from] MemoryError),
    /// The command output could not be written.
    Io(#[from] std::io::Error),
}

/// The signature of a command implementation.
pub type CommandHandler =
    fn(memory: &mut dyn MemoryInterface, out: &mut dyn Write) -> Result<(), CommandError>;

/// A named command with its help text.
#[derive(Clone, Copy)]
pub struct Command {
    /// The name the command is invoked by.
    pub name: &'static str,
    /// One line description.
    pub help: &'static str,
    handler: CommandHandler,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("help", &self.help)
            .finish_non_exhaustive()
    }
}

/// A group of commands, kept in registration order.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    group: &'static str,
    commands: Vec<Command>,
}

impl CommandRegistry {
    /// Create an empty registry for the command group `group`.
    pub fn new(group: &'static str) -> Self {
        Self {
            group,
            commands: Vec::new(),
        }
    }

    /// Name of the command group.
    pub fn group(&self) -> &'static str {
        self.group
    }

    /// Add a command. A command with the same name replaces the earlier one.
    pub fn register(
        &mut self,
        name: &'static str,
        help: &'static str,
        handler: CommandHandler,
    ) -> &mut Self {
        self.commands.retain(|command| command.name != name);
        self.commands.push(Command {
            name,
            help,
            handler,
        });
        self
    }

    /// Look up a command by name.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|command| command.name == name)
    }

    /// All commands in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Run the command `name`, writing its output to `out`.
    pub fn run(
        &self,
        name: &str,
        memory: &mut dyn MemoryInterface,
        out: &mut dyn Write,
    ) -> Result<(), CommandError> {
        let command = self
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        tracing::debug!("Running {} command {}", self.group, command.name);
        (command.handler)(memory, out)
    }

    /// Write the help text of all commands.
    pub fn write_help(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "{} commands:", self.group)?;
        for command in &self.commands {
            writeln!(out, "\t{} -- {}", command.name, command.help)?;
        }
        Ok(())
    }
}

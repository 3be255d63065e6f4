//! The table of commands implemented directly by this binary.

use std::ffi::{OsStr, OsString};

use anyhow::Result;

/// Entry point of a built-in command.
///
/// Receives the registry it was dispatched from and the full argument
/// vector (with `argv[0]` being the command name as invoked); the returned
/// value becomes the process exit code.
pub type Handler = fn(&Registry, &[OsString]) -> Result<i32>;

/// A built-in command.
#[derive(Debug, Clone, Copy)]
pub struct CommandDescriptor {
    /// Name matched against the basename of `argv[0]`.
    pub name: &'static str,
    /// Implementation.
    pub handler: Handler,
    /// One-line description shown by `help`.
    pub short_help: &'static str,
}

/// An ordered set of built-in commands.
#[derive(Debug, Default)]
pub struct Registry {
    commands: Vec<CommandDescriptor>,
}

/// Accumulates commands in registration order.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    commands: Vec<CommandDescriptor>,
}

impl RegistryBuilder {
    /// Append a command.
    pub fn register(
        mut self,
        name: &'static str,
        handler: Handler,
        short_help: &'static str,
    ) -> Self {
        self.commands.push(CommandDescriptor {
            name,
            handler,
            short_help,
        });
        self
    }

    /// Finish building.
    pub fn build(self) -> Registry {
        Registry {
            commands: self.commands,
        }
    }
}

impl Registry {
    /// Start an empty registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Find a command by name. If a name was registered more than once,
    /// the earliest registration wins.
    pub fn lookup(&self, name: &OsStr) -> Option<&CommandDescriptor> {
        self.commands.iter().find(|c| OsStr::new(c.name) == name)
    }

    /// All commands, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.iter()
    }
}

/// Every command built into this binary, in the order `help` lists them.
pub fn builtin() -> Registry {
    Registry::builder()
        .register("help", crate::builtins::help, "Show a bit of help")
        .build()
}

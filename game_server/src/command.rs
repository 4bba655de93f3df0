//! Chat command table.
//!
//! Commands are kept sorted by name (ASCII case-insensitive) so `/help`
//! lists them alphabetically. Lookup ignores everything after the first
//! whitespace of the query, so a whole command line can be passed in.

use std::cmp::Ordering;

use thiserror::Error;

/// Upper bound on registered chat commands.
pub const MAX_SERVER_COMMANDS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command table full, '{0}' not registered")]
    TableFull(String),
    #[error("invalid command name '{0}'")]
    InvalidName(String),
}

/// One registered chat command.
#[derive(Debug, Clone)]
pub struct ServerCommand<H> {
    pub name: String,
    pub help: String,
    pub args_format: String,
    pub handler: H,
}

#[derive(Debug, Clone)]
pub struct CommandTable<H> {
    commands: Vec<ServerCommand<H>>,
}

impl<H> Default for CommandTable<H> {
    fn default() -> Self {
        Self {
            commands: Vec::with_capacity(MAX_SERVER_COMMANDS),
        }
    }
}

fn cmp_nocase(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

/// First word of a line, without leading whitespace.
fn first_word(line: &str) -> &str {
    let line = line.trim_start();
    line.split(char::is_whitespace).next().unwrap_or("")
}

impl<H: Copy> CommandTable<H> {
    /// Registers a command or updates an existing one in place.
    pub fn register(
        &mut self,
        name: &str,
        help: &str,
        args_format: &str,
        handler: H,
    ) -> Result<(), CommandError> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(CommandError::InvalidName(name.to_string()));
        }
        if let Some(existing) = self
            .commands
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
        {
            existing.help = help.to_string();
            existing.args_format = args_format.to_string();
            existing.handler = handler;
            return Ok(());
        }
        if self.commands.len() >= MAX_SERVER_COMMANDS {
            return Err(CommandError::TableFull(name.to_string()));
        }
        let pos = self
            .commands
            .iter()
            .position(|c| cmp_nocase(name, &c.name) == Ordering::Less)
            .unwrap_or(self.commands.len());
        self.commands.insert(
            pos,
            ServerCommand {
                name: name.to_string(),
                help: help.to_string(),
                args_format: args_format.to_string(),
                handler,
            },
        );
        Ok(())
    }

    /// Finds the command named by the first word of `line`.
    pub fn find(&self, line: &str) -> Option<&ServerCommand<H>> {
        let word = first_word(line);
        if word.is_empty() {
            return None;
        }
        self.commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(word))
    }

    /// Registered commands in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &ServerCommand<H>> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Splits a command line into its name and the argument words.
pub fn split_line(line: &str) -> (&str, Vec<&str>) {
    let name = first_word(line);
    let rest = line.trim_start()[name.len()..].split_whitespace().collect();
    (name, rest)
}

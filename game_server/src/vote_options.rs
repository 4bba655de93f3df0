//! Admin-managed list of vote options.
//!
//! Options keep insertion order. Removing one rebuilds the list and bumps
//! the generation so anything holding an index knows to look again.

use thiserror::Error;

/// Most options the catalog holds.
pub const MAX_VOTE_OPTIONS: usize = 128;
/// Description length limit (exclusive).
pub const VOTE_DESC_LENGTH: usize = 64;
/// Command length limit (exclusive).
pub const VOTE_CMD_LENGTH: usize = 512;
/// Descriptions per `VoteOptionListAdd` message.
pub const OPTIONS_PER_LIST_MSG: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteOptionError {
    #[error("maximum number of vote options reached")]
    Full,
    #[error("skipped invalid command '{0}'")]
    InvalidCommand(String),
    #[error("skipped invalid option '{0}'")]
    InvalidDescription(String),
    #[error("option '{0}' already exists")]
    Duplicate(String),
    #[error("option '{0}' does not exist")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOption {
    pub description: String,
    pub command: String,
}

#[derive(Debug, Clone, Default)]
pub struct VoteOptionCatalog {
    options: Vec<VoteOption>,
    generation: u64,
}

impl VoteOptionCatalog {
    /// Adds an option. `line_is_valid` decides whether the command would
    /// execute on the admin console.
    pub fn add(
        &mut self,
        description: &str,
        command: &str,
        line_is_valid: impl Fn(&str) -> bool,
    ) -> Result<&VoteOption, VoteOptionError> {
        if self.options.len() >= MAX_VOTE_OPTIONS {
            return Err(VoteOptionError::Full);
        }
        if command.len() >= VOTE_CMD_LENGTH || !line_is_valid(command) {
            return Err(VoteOptionError::InvalidCommand(command.to_string()));
        }
        let description = description.trim_start_matches(' ');
        if description.is_empty() || description.len() >= VOTE_DESC_LENGTH {
            return Err(VoteOptionError::InvalidDescription(description.to_string()));
        }
        if self.find(description).is_some() {
            return Err(VoteOptionError::Duplicate(description.to_string()));
        }

        self.options.push(VoteOption {
            description: description.to_string(),
            command: command.to_string(),
        });
        Ok(&self.options[self.options.len() - 1])
    }

    /// Removes an option by description (case-insensitive).
    pub fn remove(&mut self, description: &str) -> Result<VoteOption, VoteOptionError> {
        let Some(idx) = self
            .options
            .iter()
            .position(|o| o.description.eq_ignore_ascii_case(description))
        else {
            return Err(VoteOptionError::NotFound(description.to_string()));
        };

        let removed = self.options[idx].clone();
        self.options = self
            .options
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .map(|(_, o)| o.clone())
            .collect();
        self.generation += 1;
        Ok(removed)
    }

    pub fn clear(&mut self) {
        self.options.clear();
        self.generation += 1;
    }

    pub fn find(&self, description: &str) -> Option<&VoteOption> {
        self.options
            .iter()
            .find(|o| o.description.eq_ignore_ascii_case(description))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoteOption> {
        self.options.iter()
    }

    /// Descriptions grouped for `VoteOptionListAdd`.
    pub fn description_chunks(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.options
            .chunks(OPTIONS_PER_LIST_MSG)
            .map(|chunk| chunk.iter().map(|o| o.description.clone()).collect())
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Bumped whenever options are removed.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

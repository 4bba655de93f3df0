//! Console line parsing.
//!
//! Provides:
//! - Typed console values for variable get/set
//! - Command flags
//! - Statement splitting (`;` outside quotes)
//! - Argument parsing against a format string
//!
//! # Argument formats
//! Each character describes one argument: `s` a (possibly quoted) string,
//! `i` an integer, `f` a float, `r` the rest of the line. A `?` marks every
//! following argument as optional.
//!
//! ```ignore
//! let args = parse_args("set_team", "ii?i", "3 -1")?;
//! assert_eq!(args.get_int(0), Some(3));
//! assert_eq!(args.len(), 2);
//! ```

use thiserror::Error;

/// Console variable value.
#[derive(Debug, Clone, PartialEq)]
pub enum CvarValue {
    Int(i64),
    String(String),
}

impl CvarValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CvarValue::Int(v) => Some(*v),
            CvarValue::String(s) => s.parse().ok(),
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            CvarValue::String(s) => s.clone(),
            CvarValue::Int(v) => v.to_string(),
        }
    }
}

impl std::fmt::Display for CvarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CvarValue::Int(v) => write!(f, "{}", v),
            CvarValue::String(v) => write!(f, "\"{}\"", v),
        }
    }
}

bitflags::bitflags! {
    /// Command flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u32 {
        const NONE = 0;
        const SERVER = 1 << 0;     // Server console command
        const STORE = 1 << 1;      // Stored in the config when written out
        const VOTE_SAFE = 1 << 2;  // May run from a passed vote
    }
}

impl Default for CommandFlags {
    fn default() -> Self {
        Self::NONE
    }
}

/// Console parsing/execution failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsoleError {
    #[error("No such command: {0}")]
    UnknownCommand(String),
    #[error("Invalid arguments... Usage: {command} {format}")]
    MissingArgument { command: String, format: String },
    #[error("{command}: '{value}' is not an integer")]
    InvalidInteger { command: String, value: String },
    #[error("{command}: '{value}' is not a number")]
    InvalidFloat { command: String, value: String },
    #[error("unterminated quote in '{0}'")]
    UnterminatedQuote(String),
    #[error("access denied to '{0}'")]
    AccessDenied(String),
}

/// One parsed argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i32),
    Float(f32),
}

/// Arguments of one command invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsoleArgs {
    values: Vec<ArgValue>,
}

impl ConsoleArgs {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_str(&self, i: usize) -> Option<&str> {
        match self.values.get(i)? {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, i: usize) -> Option<i32> {
        match self.values.get(i)? {
            ArgValue::Int(v) => Some(*v),
            ArgValue::Float(v) => Some(*v as i32),
            ArgValue::Str(s) => s.trim().parse().ok(),
        }
    }

    pub fn get_float(&self, i: usize) -> Option<f32> {
        match self.values.get(i)? {
            ArgValue::Float(v) => Some(*v),
            ArgValue::Int(v) => Some(*v as f32),
            ArgValue::Str(s) => s.trim().parse().ok(),
        }
    }
}

/// Splits a console line into statements at `;` outside quotes.
pub fn split_statements(line: &str) -> Result<Vec<&str>, ConsoleError> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                out.push(line[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(ConsoleError::UnterminatedQuote(line.to_string()));
    }
    out.push(line[start..].trim());
    out.retain(|s| !s.is_empty());
    Ok(out)
}

/// Splits a statement into the command name and the raw argument text.
pub fn split_command(statement: &str) -> (&str, &str) {
    let statement = statement.trim_start();
    match statement.find(char::is_whitespace) {
        Some(pos) => (&statement[..pos], statement[pos..].trim_start()),
        None => (statement, ""),
    }
}

/// Reads one string token, honoring quotes and `\"` escapes.
fn next_token(rest: &str) -> Result<Option<(String, &str)>, ConsoleError> {
    let rest = rest.trim_start();
    if rest.is_empty() {
        return Ok(None);
    }
    if let Some(quoted) = rest.strip_prefix('"') {
        let mut token = String::new();
        let mut chars = quoted.char_indices();
        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' => {
                    if let Some((_, next)) = chars.next() {
                        token.push(next);
                    }
                }
                '"' => return Ok(Some((token, &quoted[idx + 1..]))),
                _ => token.push(ch),
            }
        }
        return Err(ConsoleError::UnterminatedQuote(rest.to_string()));
    }
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Ok(Some((rest[..end].to_string(), &rest[end..])))
}

/// Parses raw argument text against a format string.
pub fn parse_args(command: &str, format: &str, text: &str) -> Result<ConsoleArgs, ConsoleError> {
    let mut args = ConsoleArgs::default();
    let mut optional = false;
    let mut rest = text;

    for spec in format.chars() {
        if spec == '?' {
            optional = true;
            continue;
        }

        if spec == 'r' {
            let remaining = rest.trim();
            if remaining.is_empty() {
                if optional {
                    break;
                }
                return Err(missing(command, format));
            }
            let value = remaining
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(remaining);
            args.values.push(ArgValue::Str(value.to_string()));
            break;
        }

        let Some((token, after)) = next_token(rest)? else {
            if optional {
                break;
            }
            return Err(missing(command, format));
        };
        rest = after;

        let value = match spec {
            'i' => ArgValue::Int(token.parse().map_err(|_| ConsoleError::InvalidInteger {
                command: command.to_string(),
                value: token.clone(),
            })?),
            'f' => ArgValue::Float(token.parse().map_err(|_| ConsoleError::InvalidFloat {
                command: command.to_string(),
                value: token.clone(),
            })?),
            _ => ArgValue::Str(token),
        };
        args.values.push(value);
    }

    Ok(args)
}

fn missing(command: &str, format: &str) -> ConsoleError {
    ConsoleError::MissingArgument {
        command: command.to_string(),
        format: format.to_string(),
    }
}

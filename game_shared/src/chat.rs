//! Chat text sanitation and spam protection.
//!
//! # Length rule
//! A chat line keeps at most [`MAX_CHAT_CHARS`] characters. The cut is a
//! hard character cut, not a search back for a word break: a word spanning
//! the limit is split. Trailing whitespace is trimmed afterwards, so a cut
//! that lands on a space ends the line at the preceding word. The counted
//! length includes that trailing whitespace, which matters for the
//! length-scaled cooldown.
//!
//! # Spam rules (all in ticks)
//! - Base cooldown: one second between lines.
//! - Length cooldown: `len / 20` seconds since the last line.
//! - Fair-spam: a line sent before `(15 + len) / 16 + 1` seconds have passed
//!   adds [`SPAM_VIOLATION_WEIGHT`] to a counter; reaching
//!   [`SPAM_THRESHOLD`] soft-mutes the sender for [`SOFT_MUTE_SECONDS`] and
//!   resets the counter.

use serde::{Deserialize, Serialize};

/// Maximum characters of a chat line.
pub const MAX_CHAT_CHARS: usize = 127;
/// Counter increment per fair-spam violation.
pub const SPAM_VIOLATION_WEIGHT: u32 = 2;
/// Counter value that triggers a soft mute.
pub const SPAM_THRESHOLD: u32 = 5;
/// Soft-mute length.
pub const SOFT_MUTE_SECONDS: u64 = 2;

/// A chat line after truncation and trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedLine {
    pub text: String,
    /// Characters kept before trailing whitespace was trimmed.
    pub length: usize,
}

impl SanitizedLine {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Truncates to [`MAX_CHAT_CHARS`] characters and trims trailing whitespace.
pub fn sanitize_line(raw: &str) -> SanitizedLine {
    let mut length = 0;
    let mut cut = raw.len();
    for (idx, ch) in raw.char_indices() {
        length += 1;
        if length >= MAX_CHAT_CHARS {
            cut = idx + ch.len_utf8();
            break;
        }
    }
    let text = raw[..cut].trim_end().to_string();
    SanitizedLine { text, length }
}

/// Outcome of a spam check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatVerdict {
    /// The line may be delivered.
    Accept,
    /// The line is silently dropped.
    Drop,
}

/// Per-player chat spam state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSpamGuard {
    /// Tick of the last accepted line; may lie in the future while muted.
    pub last_chat: Option<u64>,
    pub spam_count: u32,
}

impl ChatSpamGuard {
    /// Base cooldown check, done before the text is even looked at.
    pub fn in_cooldown(&self, now: u64, tick_speed: u64) -> bool {
        self.last_chat.is_some_and(|last| last + tick_speed > now)
    }

    /// Full check for a sanitized line. Updates the guard when accepted.
    pub fn check(
        &mut self,
        line: &SanitizedLine,
        now: u64,
        tick_speed: u64,
        spam_protection: bool,
    ) -> ChatVerdict {
        if spam_protection && self.in_cooldown(now, tick_speed) {
            return ChatVerdict::Drop;
        }

        let len = line.length as u64;
        let too_fast = spam_protection
            && self
                .last_chat
                .is_some_and(|last| last + tick_speed * (len / 20) > now);
        if line.is_empty() || too_fast {
            return ChatVerdict::Drop;
        }

        let fair_window = tick_speed * ((15 + len) / 16 + 1);
        if self.last_chat.is_some_and(|last| last + fair_window > now) {
            self.spam_count += SPAM_VIOLATION_WEIGHT;
            if self.spam_count >= SPAM_THRESHOLD {
                self.last_chat = Some(now + tick_speed * SOFT_MUTE_SECONDS);
                self.spam_count = 0;
            } else {
                self.last_chat = Some(now);
            }
        } else {
            self.last_chat = Some(now);
            self.spam_count = 0;
        }
        ChatVerdict::Accept
    }
}

/// Splits a slash command off a chat line. Returns the text after `/`.
pub fn slash_command(line: &SanitizedLine) -> Option<&str> {
    if line.length > 1 {
        line.text.strip_prefix('/')
    } else {
        None
    }
}

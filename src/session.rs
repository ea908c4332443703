//! Sessions: one named conversation each.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

use crate::log::MessageLog;

/// Display name given to a session before its first user message.
pub const PLACEHOLDER_NAME: &str = "New Chat";

/// Number of characters of the first user message kept in a session name.
const NAME_EXCERPT_CHARS: usize = 20;

const ID_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day][hour][minute][second]");

const NAME_TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");

/// Stable identifier of a session.
///
/// Ids are derived from the creation time (`YYYYMMDDHHMMSS`) and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives an identifier from a timestamp.
    pub fn from_time(now: OffsetDateTime) -> Self {
        // The format only contains numeric components, which always format.
        let id = now
            .format(ID_FORMAT)
            .unwrap_or_else(|_| now.unix_timestamp().to_string());
        Self(id)
    }

    /// Derives an identifier from a timestamp, adding a `-N` suffix until `taken` reports false.
    pub fn unique_from_time(now: OffsetDateTime, taken: impl Fn(&SessionId) -> bool) -> Self {
        let base = Self::from_time(now);
        if !taken(&base) {
            return base;
        }
        (2u32..)
            .map(|n| SessionId(format!("{}-{n}", base.0)))
            .find(|candidate| !taken(candidate))
            .unwrap_or(base)
    }

    /// The identifier as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Whether a session is waiting on the completion gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Ready for input.
    Idle,
    /// A completion for this session is outstanding.
    AwaitingResponse,
}

/// One conversation: its identifier, display name and message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Stable identifier.
    pub id: SessionId,
    /// Name shown in the session list.
    pub name: String,
    /// The conversation.
    pub log: MessageLog,
}

impl Session {
    /// Creates a session with a placeholder name and a log holding only `system_prompt`.
    pub fn new(id: SessionId, system_prompt: &str) -> Self {
        Self {
            id,
            name: PLACEHOLDER_NAME.to_string(),
            log: MessageLog::new(system_prompt),
        }
    }
}

/// Builds the display name for a session from its first user message.
///
/// The name is the first twenty characters of the message, an ellipsis, and the time in
/// parentheses, e.g. `Explain borrowing in... (2024-05-01 14:03)`.
pub fn display_name(first_user_message: &str, now: OffsetDateTime) -> String {
    let excerpt: String = first_user_message.chars().take(NAME_EXCERPT_CHARS).collect();
    let timestamp = now
        .format(NAME_TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| now.date().to_string());
    format!("{excerpt}... ({timestamp})")
}

/// The current local time, falling back to UTC when the local offset cannot be determined.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

//! The ordered record of one conversation.

use serde::{Deserialize, Serialize};

use crate::types::{Message, Role};

/// Ordered, append-only list of role-tagged messages.
///
/// A log built with [`MessageLog::new`] always starts with a system message.  Logs read back from
/// disk are taken as they were written, so an empty log is representable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    /// Creates a log holding only the given system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Wraps previously stored messages without checking their shape.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Appends a message to the end of the log.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    /// Returns an owned copy of the log, suitable for sending to the gateway.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// True exactly when the log is the system message followed by one user message.
    pub fn is_first_exchange(&self) -> bool {
        matches!(
            self.messages.as_slice(),
            [first, second] if first.role == Role::System && second.role == Role::User
        )
    }

    /// The content of the leading system message, if present.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
    }

    /// The most recently appended message.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages, including the system message.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the log holds no messages at all.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Iterates over the messages in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }
}

impl<'a> IntoIterator for &'a MessageLog {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

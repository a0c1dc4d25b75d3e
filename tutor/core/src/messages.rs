//! Chat Messages
//!
//! The message type shared by every layer of the tutor: histories hold them,
//! the orchestrator yields them from chat streams, and UI surfaces render the
//! snapshots built from them.
//!
//! # Lifecycle
//!
//! - User messages are created complete (`is_streaming == false`).
//! - Assistant replies start as a provisional streaming record whose content
//!   grows as fragments arrive; the final record replaces it and keeps its id.
//! - Error messages are local, never persisted, and invite a retry.
//!
//! Once `is_streaming` is false a message is never mutated again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::character::CharacterId;

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The student
    User,
    /// The tutor persona
    Assistant,
}

/// Text shown when a reply could not be produced
pub const RETRY_PROMPT: &str =
    "Sorry, I couldn't answer that just now. Please check your connection and tap retry.";

/// A single message in a character's conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// Which tutor conversation this message belongs to
    pub character: CharacterId,
    /// Whether the message is still being streamed
    pub is_streaming: bool,
    /// Whether this is a local failure notice
    pub is_error: bool,
}

impl ChatMessage {
    /// Create a complete user message
    pub fn user(character: CharacterId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            character,
            is_streaming: false,
            is_error: false,
        }
    }

    /// Create a complete assistant message
    pub fn assistant(character: CharacterId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            character,
            is_streaming: false,
            is_error: false,
        }
    }

    /// Create a provisional assistant message (content will be replaced)
    #[must_use]
    pub fn streaming(character: CharacterId) -> Self {
        Self {
            is_streaming: true,
            ..Self::assistant(character, String::new())
        }
    }

    /// Create an error notice carrying the retry prompt
    #[must_use]
    pub fn error(character: CharacterId) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(character, RETRY_PROMPT)
        }
    }

    /// Whether the message is a finished user or assistant turn
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_streaming && !self.is_error
    }
}

/// Immutable copy of the active character's history
///
/// Published on the orchestrator's broadcast channel after every mutation.
/// `revision` increases strictly with each publication, so subscribers can
/// discard anything older than what they already rendered.
#[derive(Clone, Debug)]
pub struct HistorySnapshot {
    /// Character whose history this is
    pub character: CharacterId,
    /// Publication counter
    pub revision: u64,
    /// The messages, oldest first
    pub messages: Arc<[ChatMessage]>,
}

impl HistorySnapshot {
    /// Number of messages in the snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the snapshot has no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent message, if any
    #[must_use]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

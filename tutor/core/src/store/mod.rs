//! History Persistence
//!
//! Settled chat messages are persisted as flat [`MessageRecord`]s through the
//! [`MessageStore`] trait. Two stores are provided:
//!
//! - [`MemoryStore`]: process-local, used for tests and `--memory-store`
//! - [`JsonlStore`]: checksummed JSON lines on disk
//!
//! [`HistoryArchive`] sits on top of either store and enforces retention caps.

mod archive;
mod jsonl;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::character::CharacterId;
use crate::messages::{ChatMessage, MessageId, MessageRole};

pub use archive::{HistoryArchive, DEFAULT_GLOBAL_CAP, DEFAULT_PER_CHARACTER_CAP};
pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Errors raised by message stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Who wrote a persisted message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The student
    User,
    /// The tutor
    Ai,
}

/// Persisted form of a settled message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message identifier
    pub id: MessageId,
    /// Who wrote it
    pub sender: Sender,
    /// Message text
    pub text: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Conversation the message belongs to
    pub character: CharacterId,
}

impl From<&ChatMessage> for MessageRecord {
    fn from(message: &ChatMessage) -> Self {
        Self {
            id: message.id.clone(),
            sender: match message.role {
                MessageRole::User => Sender::User,
                MessageRole::Assistant => Sender::Ai,
            },
            text: message.content.clone(),
            timestamp: message.timestamp,
            character: message.character,
        }
    }
}

impl From<MessageRecord> for ChatMessage {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            role: match record.sender {
                Sender::User => MessageRole::User,
                Sender::Ai => MessageRole::Assistant,
            },
            content: record.text,
            timestamp: record.timestamp,
            character: record.character,
            is_streaming: false,
            is_error: false,
        }
    }
}

/// Storage backend for message records
///
/// Records are returned in insertion order.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one record
    async fn append(&self, record: MessageRecord) -> Result<(), StoreError>;

    /// Every stored record, oldest insertion first
    async fn load_all(&self) -> Result<Vec<MessageRecord>, StoreError>;

    /// Remove the records with the given ids, returning how many were found
    async fn remove_many(&self, ids: &[MessageId]) -> Result<usize, StoreError>;

    /// Remove one record
    async fn remove(&self, id: &MessageId) -> Result<bool, StoreError> {
        Ok(self.remove_many(std::slice::from_ref(id)).await? > 0)
    }

    /// Remove every record of a character
    async fn remove_character(&self, character: CharacterId) -> Result<usize, StoreError>;

    /// Remove everything
    async fn clear(&self) -> Result<(), StoreError>;

    /// Number of stored records
    async fn len(&self) -> Result<usize, StoreError>;

    /// Whether the store is empty
    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}

//! Retention-capped history archive
//!
//! Wraps a [`MessageStore`] and keeps it within two caps after every append:
//! a per-character cap and a global cap. Eviction is oldest first by
//! timestamp, falling back to insertion order for equal timestamps.
//!
//! Only settled messages are archived. Streaming records and error notices
//! are skipped.

use std::sync::Arc;

use super::{MessageRecord, MessageStore, StoreError};
use crate::character::CharacterId;
use crate::messages::{ChatMessage, MessageId};

/// Persisted messages kept per character
pub const DEFAULT_PER_CHARACTER_CAP: usize = 100;

/// Persisted messages kept overall
pub const DEFAULT_GLOBAL_CAP: usize = 400;

/// Message store with retention caps
#[derive(Clone)]
pub struct HistoryArchive {
    store: Arc<dyn MessageStore>,
    per_character_cap: usize,
    global_cap: usize,
}

impl std::fmt::Debug for HistoryArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryArchive")
            .field("per_character_cap", &self.per_character_cap)
            .field("global_cap", &self.global_cap)
            .finish_non_exhaustive()
    }
}

impl HistoryArchive {
    /// Wrap a store with the default caps
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_caps(store, DEFAULT_PER_CHARACTER_CAP, DEFAULT_GLOBAL_CAP)
    }

    /// Wrap a store with explicit caps
    pub fn with_caps(store: Arc<dyn MessageStore>, per_character_cap: usize, global_cap: usize) -> Self {
        Self {
            store,
            per_character_cap,
            global_cap,
        }
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Persist a settled message, then evict beyond the caps
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        if !message.is_settled() {
            tracing::debug!(id = %message.id, "Not archiving unsettled message");
            return Ok(());
        }

        self.store.append(MessageRecord::from(message)).await?;
        self.enforce_caps(message.character).await
    }

    async fn enforce_caps(&self, character: CharacterId) -> Result<(), StoreError> {
        let records = self.store.load_all().await?;

        // Stable sort keeps insertion order for equal timestamps
        let mut oldest_first: Vec<&MessageRecord> = records.iter().collect();
        oldest_first.sort_by_key(|r| r.timestamp);

        let own = oldest_first
            .iter()
            .filter(|r| r.character == character)
            .count();
        let mut evict: Vec<MessageId> = oldest_first
            .iter()
            .filter(|r| r.character == character)
            .take(own.saturating_sub(self.per_character_cap))
            .map(|r| r.id.clone())
            .collect();

        let remaining = records.len() - evict.len();
        if remaining > self.global_cap {
            let extra = remaining - self.global_cap;
            let global: Vec<MessageId> = oldest_first
                .iter()
                .filter(|r| !evict.contains(&r.id))
                .take(extra)
                .map(|r| r.id.clone())
                .collect();
            evict.extend(global);
        }

        if evict.is_empty() {
            return Ok(());
        }

        let removed = self.store.remove_many(&evict).await?;
        tracing::debug!(
            character = %character,
            removed,
            "Evicted archived messages beyond retention caps"
        );
        Ok(())
    }

    /// Every archived message, oldest first
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn load(&self) -> Result<Vec<ChatMessage>, StoreError> {
        let mut records = self.store.load_all().await?;
        records.sort_by_key(|r| r.timestamp);
        Ok(records.into_iter().map(ChatMessage::from).collect())
    }

    /// Remove specific messages
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn remove(&self, ids: &[MessageId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.remove_many(ids).await
    }

    /// Remove everything archived for a character
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn clear_character(&self, character: CharacterId) -> Result<usize, StoreError> {
        self.store.remove_character(character).await
    }

    /// Remove everything
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear().await
    }

    /// Number of archived messages
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.len().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::store::MemoryStore;

    fn archive(per_character: usize, global: usize) -> HistoryArchive {
        HistoryArchive::with_caps(Arc::new(MemoryStore::new()), per_character, global)
    }

    fn message_at(character: CharacterId, text: &str, offset_secs: i64) -> ChatMessage {
        let mut msg = ChatMessage::user(character, text);
        msg.timestamp = Utc::now() - Duration::days(1) + Duration::seconds(offset_secs);
        msg
    }

    #[tokio::test]
    async fn test_skips_unsettled_messages() {
        let archive = archive(10, 10);
        archive.append(&ChatMessage::error(CharacterId::Newton)).await.unwrap();
        archive.append(&ChatMessage::streaming(CharacterId::Newton)).await.unwrap();
        assert_eq!(archive.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_per_character_cap_evicts_oldest() {
        let archive = archive(3, 100);
        for i in 0..5 {
            archive
                .append(&message_at(CharacterId::Mendel, &format!("m{i}"), i))
                .await
                .unwrap();
        }
        archive
            .append(&message_at(CharacterId::Curie, "c0", 0))
            .await
            .unwrap();

        let texts: Vec<String> = archive.load().await.unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(texts, vec!["c0", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_global_cap_evicts_oldest_across_characters() {
        let archive = archive(100, 4);
        let characters = CharacterId::ALL;
        for i in 0..6 {
            let character = characters[usize::try_from(i).unwrap() % characters.len()];
            archive
                .append(&message_at(character, &format!("g{i}"), i))
                .await
                .unwrap();
            assert!(archive.len().await.unwrap() <= 4);
        }

        let texts: Vec<String> = archive.load().await.unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(texts, vec!["g2", "g3", "g4", "g5"]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_evict_in_insertion_order() {
        let archive = archive(2, 100);
        let stamp = Utc::now();
        for text in ["first", "second", "third"] {
            let mut msg = ChatMessage::user(CharacterId::Aristotle, text);
            msg.timestamp = stamp;
            archive.append(&msg).await.unwrap();
        }

        let texts: Vec<String> = archive.load().await.unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(texts, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn test_clear_character_and_remove() {
        let archive = archive(100, 400);
        let keep = message_at(CharacterId::Aristotle, "keep", 0);
        let gone = message_at(CharacterId::Aristotle, "gone", 1);
        archive.append(&keep).await.unwrap();
        archive.append(&gone).await.unwrap();
        archive.append(&message_at(CharacterId::Mendel, "peas", 2)).await.unwrap();

        assert_eq!(archive.remove(&[gone.id.clone()]).await.unwrap(), 1);
        assert_eq!(archive.remove(&[]).await.unwrap(), 0);
        assert_eq!(archive.clear_character(CharacterId::Mendel).await.unwrap(), 1);

        let remaining = archive.load().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep.id);
    }
}

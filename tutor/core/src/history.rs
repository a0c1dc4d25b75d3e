//! Conversation Histories
//!
//! In-memory message history, one per tutor character. The orchestrator is
//! the only writer; everything here is synchronous and cheap so it can run
//! under a short lock.
//!
//! # Invariants
//!
//! - [`ConversationStore`] holds exactly one history per character, created
//!   empty and never removed (only cleared)
//! - a history contains at most one streaming record
//! - a history never exceeds its cap; the oldest settled messages go first
//!   and the streaming record is never evicted

use std::collections::BTreeMap;

use crate::character::CharacterId;
use crate::messages::{ChatMessage, MessageId, MessageRole};

/// Default number of messages kept in memory per character
pub const DEFAULT_MEMORY_CAP: usize = 20;

/// Ordered message history for one character
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    character: CharacterId,
    messages: Vec<ChatMessage>,
    /// Currently streaming message (if any)
    streaming_id: Option<MessageId>,
    /// Maximum number of messages to keep (0 = unlimited)
    max_messages: usize,
}

impl ConversationHistory {
    /// Create an empty history with the given cap
    #[must_use]
    pub fn new(character: CharacterId, max_messages: usize) -> Self {
        Self {
            character,
            messages: Vec::new(),
            streaming_id: None,
            max_messages,
        }
    }

    /// The character this history belongs to
    #[must_use]
    pub fn character(&self) -> CharacterId {
        self.character
    }

    /// Append a settled message (user, assistant or error)
    pub fn push(&mut self, message: ChatMessage) {
        debug_assert!(!message.is_streaming, "use upsert_streaming for provisional records");
        self.messages.push(message);
        self.prune_if_needed();
    }

    /// Create or replace the provisional streaming record
    ///
    /// The record keeps the id of the first call until it is completed or
    /// cancelled; later calls only replace its content.
    pub fn upsert_streaming(&mut self, content: &str) -> ChatMessage {
        if let Some(msg) = self.streaming_message_mut() {
            msg.content.clear();
            msg.content.push_str(content);
            return msg.clone();
        }

        let mut msg = ChatMessage::streaming(self.character);
        msg.content.push_str(content);
        self.streaming_id = Some(msg.id.clone());
        self.messages.push(msg.clone());
        self.prune_if_needed();
        msg
    }

    /// Replace the streaming record with its final version
    ///
    /// When nothing was streaming the final message is appended as a fresh
    /// record.
    pub fn complete_streaming(&mut self, content: String) -> ChatMessage {
        let Some(streaming_id) = self.streaming_id.take() else {
            let msg = ChatMessage::assistant(self.character, content);
            self.push(msg.clone());
            return msg;
        };

        let Some(index) = self.messages.iter().position(|m| m.id == streaming_id) else {
            let msg = ChatMessage {
                id: streaming_id,
                ..ChatMessage::assistant(self.character, content)
            };
            self.push(msg.clone());
            return msg;
        };

        let msg = &mut self.messages[index];
        msg.content = content;
        msg.is_streaming = false;
        let done = msg.clone();
        self.prune_if_needed();
        done
    }

    /// Drop the streaming record, if any
    pub fn cancel_streaming(&mut self) -> bool {
        match self.streaming_id.take() {
            Some(streaming_id) => {
                self.messages.retain(|m| m.id != streaming_id);
                true
            }
            None => false,
        }
    }

    /// Check if currently streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming_id.is_some()
    }

    fn streaming_message_mut(&mut self) -> Option<&mut ChatMessage> {
        let streaming_id = self.streaming_id.as_ref()?;
        self.messages.iter_mut().find(|m| &m.id == streaming_id)
    }

    /// Remove error notices from the end of the history
    pub fn remove_trailing_errors(&mut self) -> usize {
        let mut removed = 0;
        while self.messages.last().is_some_and(|m| m.is_error) {
            self.messages.pop();
            removed += 1;
        }
        removed
    }

    /// Position of the most recent user message
    #[must_use]
    pub fn last_user_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.role == MessageRole::User)
    }

    /// Remove the message at `index` and everything after it
    pub fn truncate_from(&mut self, index: usize) -> Vec<ChatMessage> {
        if index >= self.messages.len() {
            return Vec::new();
        }
        let removed = self.messages.split_off(index);
        if removed
            .iter()
            .any(|m| Some(&m.id) == self.streaming_id.as_ref())
        {
            self.streaming_id = None;
        }
        removed
    }

    /// The last `count` settled messages, oldest first
    ///
    /// Streaming records and error notices are not conversation turns and
    /// are skipped.
    #[must_use]
    pub fn recent_turns(&self, count: usize) -> Vec<&ChatMessage> {
        let mut turns: Vec<&ChatMessage> = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.is_settled())
            .take(count)
            .collect();
        turns.reverse();
        turns
    }

    /// Get all messages
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Get current message count
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Clear message history
    pub fn clear(&mut self) {
        self.messages.clear();
        self.streaming_id = None;
    }

    /// Replace the contents with previously persisted messages
    ///
    /// Only the newest messages up to the cap are kept.
    pub fn restore(&mut self, mut messages: Vec<ChatMessage>) {
        messages.sort_by_key(|m| m.timestamp);
        self.messages = messages;
        self.streaming_id = None;
        self.prune_if_needed();
    }

    /// Prune messages if the cap is exceeded
    ///
    /// Removes oldest messages (except the current streaming message) until within limits.
    fn prune_if_needed(&mut self) {
        if self.max_messages == 0 || self.messages.len() <= self.max_messages {
            return;
        }

        let to_remove = self.messages.len() - self.max_messages;
        let streaming_id = self.streaming_id.clone();
        let mut removed = 0;

        self.messages.retain(|msg| {
            // Never remove the current streaming message
            if Some(&msg.id) == streaming_id.as_ref() {
                return true;
            }
            if removed < to_remove {
                removed += 1;
                false
            } else {
                true
            }
        });

        tracing::debug!(
            character = %self.character,
            removed = removed,
            remaining = self.messages.len(),
            "Pruned conversation history"
        );
    }
}

/// One history per character
#[derive(Clone, Debug)]
pub struct ConversationStore {
    histories: BTreeMap<CharacterId, ConversationHistory>,
}

impl ConversationStore {
    /// Create empty histories for every character
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        let histories = CharacterId::ALL
            .into_iter()
            .map(|c| (c, ConversationHistory::new(c, max_messages)))
            .collect();
        Self { histories }
    }

    /// History for a character
    #[must_use]
    pub fn get(&self, character: CharacterId) -> &ConversationHistory {
        // Every character is inserted in `new` and never removed.
        &self.histories[&character]
    }

    /// Mutable history for a character
    pub fn get_mut(&mut self, character: CharacterId) -> &mut ConversationHistory {
        self.histories
            .entry(character)
            .or_insert_with(|| ConversationHistory::new(character, DEFAULT_MEMORY_CAP))
    }

    /// Total messages across all characters
    #[must_use]
    pub fn total_messages(&self) -> usize {
        self.histories.values().map(ConversationHistory::len).sum()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> ConversationHistory {
        ConversationHistory::new(CharacterId::Aristotle, DEFAULT_MEMORY_CAP)
    }

    #[test]
    fn test_streaming_keeps_single_record() {
        let mut h = history();
        h.push(ChatMessage::user(CharacterId::Aristotle, "What is mitosis?"));

        let first = h.upsert_streaming("Mitosis ");
        let second = h.upsert_streaming("Mitosis is cell division");
        assert_eq!(first.id, second.id);
        assert_eq!(h.len(), 2);
        assert_eq!(h.messages().iter().filter(|m| m.is_streaming).count(), 1);

        let done = h.complete_streaming("Mitosis is cell division.".to_string());
        assert_eq!(done.id, first.id);
        assert!(!done.is_streaming);
        assert!(!h.is_streaming());
        assert_eq!(h.messages()[1].content, "Mitosis is cell division.");
    }

    #[test]
    fn test_cancel_streaming_removes_record() {
        let mut h = history();
        h.upsert_streaming("partial");
        assert!(h.cancel_streaming());
        assert!(h.is_empty());
        assert!(!h.cancel_streaming());
    }

    #[test]
    fn test_complete_without_streaming_appends() {
        let mut h = history();
        let msg = h.complete_streaming("Hello".to_string());
        assert_eq!(h.len(), 1);
        assert_eq!(h.messages()[0].id, msg.id);
    }

    #[test]
    fn test_cap_evicts_oldest_but_not_streaming() {
        let mut h = ConversationHistory::new(CharacterId::Mendel, 3);
        h.upsert_streaming("thinking");
        for i in 0..4 {
            h.push(ChatMessage::user(CharacterId::Mendel, format!("Message {i}")));
        }

        assert_eq!(h.len(), 3);
        assert!(h.messages().iter().any(|m| m.is_streaming));
        let contents: Vec<_> = h.messages().iter().map(|m| m.content.as_str()).collect();
        assert!(!contents.contains(&"Message 0"));
        assert!(!contents.contains(&"Message 1"));
        assert!(contents.contains(&"Message 3"));
    }

    #[test]
    fn test_recent_turns_skip_errors() {
        let mut h = history();
        h.push(ChatMessage::user(CharacterId::Aristotle, "one"));
        h.push(ChatMessage::error(CharacterId::Aristotle));
        h.push(ChatMessage::user(CharacterId::Aristotle, "two"));
        h.push(ChatMessage::assistant(CharacterId::Aristotle, "three"));

        let turns: Vec<_> = h.recent_turns(2).iter().map(|m| m.content.clone()).collect();
        assert_eq!(turns, vec!["two".to_string(), "three".to_string()]);
        assert_eq!(h.recent_turns(10).len(), 3);
    }

    #[test]
    fn test_trailing_errors_and_last_user() {
        let mut h = history();
        h.push(ChatMessage::user(CharacterId::Aristotle, "question"));
        h.push(ChatMessage::error(CharacterId::Aristotle));
        h.push(ChatMessage::error(CharacterId::Aristotle));

        assert_eq!(h.remove_trailing_errors(), 2);
        assert_eq!(h.last_user_index(), Some(0));
        let removed = h.truncate_from(0);
        assert_eq!(removed.len(), 1);
        assert!(h.is_empty());
    }

    #[test]
    fn test_restore_keeps_newest() {
        let mut h = ConversationHistory::new(CharacterId::Curie, 2);
        let base = chrono::Utc::now();
        let mut older = ChatMessage::user(CharacterId::Curie, "old");
        older.timestamp = base - chrono::Duration::seconds(10);
        let mut newer = ChatMessage::assistant(CharacterId::Curie, "new");
        newer.timestamp = base - chrono::Duration::seconds(5);
        let mut newest = ChatMessage::user(CharacterId::Curie, "newest");
        newest.timestamp = base;

        h.restore(vec![newest, older, newer]);
        let contents: Vec<_> = h.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["new", "newest"]);
    }

    #[test]
    fn test_store_has_every_character() {
        let mut store = ConversationStore::default();
        for character in CharacterId::ALL {
            assert!(store.get(character).is_empty());
            assert_eq!(store.get(character).character(), character);
        }

        store
            .get_mut(CharacterId::Newton)
            .push(ChatMessage::user(CharacterId::Newton, "F = ma?"));
        assert_eq!(store.total_messages(), 1);
        assert!(store.get(CharacterId::Aristotle).is_empty());
    }
}

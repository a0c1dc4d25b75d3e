use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MessageRecord, MessageStore, StoreError};
use crate::character::CharacterId;
use crate::messages::MessageId;

/// Process-local message store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<MessageRecord>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, record: MessageRecord) -> Result<(), StoreError> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(self.records.lock().clone())
    }

    async fn remove_many(&self, ids: &[MessageId]) -> Result<usize, StoreError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| !ids.contains(&r.id));
        Ok(before - records.len())
    }

    async fn remove_character(&self, character: CharacterId) -> Result<usize, StoreError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.character != character);
        Ok(before - records.len())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.lock().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.lock().len())
    }
}

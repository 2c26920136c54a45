//! Dead letter storage
//!
//! Records are keyed by dead letter queue name (subscription or queue) and
//! message id. `take` is an atomic claim: exactly one caller gets a record.

use super::FailedMessageInfo;
use crate::error::BusError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Backing store for dead-lettered messages
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persist a record, replacing any previous record with the same message id
    async fn append(&self, info: &FailedMessageInfo) -> Result<(), BusError>;

    /// Oldest first
    async fn list(&self, queue: &str, max_count: usize) -> Result<Vec<FailedMessageInfo>, BusError>;

    /// Remove and return a record. `None` if absent or already claimed.
    async fn take(&self, queue: &str, message_id: Uuid)
    -> Result<Option<FailedMessageInfo>, BusError>;

    /// Every record in every queue, for statistics
    async fn all(&self) -> Result<Vec<FailedMessageInfo>, BusError>;
}

/// Process-local store for development
pub struct InMemoryDeadLetterStore {
    queues: Mutex<BTreeMap<String, Vec<FailedMessageInfo>>>,
    max_length: usize,
}

impl InMemoryDeadLetterStore {
    pub fn new(max_length: usize) -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            max_length: max_length.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<FailedMessageInfo>>> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InMemoryDeadLetterStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn append(&self, info: &FailedMessageInfo) -> Result<(), BusError> {
        let mut queues = self.lock();
        let records = queues.entry(info.queue.clone()).or_default();
        records.retain(|r| r.message_id != info.message_id);
        records.push(info.clone());
        if records.len() > self.max_length {
            let overflow = records.len() - self.max_length;
            records.drain(..overflow);
        }
        Ok(())
    }

    async fn list(
        &self,
        queue: &str,
        max_count: usize,
    ) -> Result<Vec<FailedMessageInfo>, BusError> {
        Ok(self
            .lock()
            .get(queue)
            .map(|records| records.iter().take(max_count).cloned().collect())
            .unwrap_or_default())
    }

    async fn take(
        &self,
        queue: &str,
        message_id: Uuid,
    ) -> Result<Option<FailedMessageInfo>, BusError> {
        let mut queues = self.lock();
        let Some(records) = queues.get_mut(queue) else {
            return Ok(None);
        };
        let taken = records
            .iter()
            .position(|r| r.message_id == message_id)
            .map(|index| records.remove(index));
        if records.is_empty() {
            queues.remove(queue);
        }
        Ok(taken)
    }

    async fn all(&self) -> Result<Vec<FailedMessageInfo>, BusError> {
        Ok(self.lock().values().flatten().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::tests::failed;

    #[tokio::test]
    async fn test_append_list_take() {
        let store = InMemoryDeadLetterStore::default();
        let first = failed("search-indexer", "ProviderApproved");
        let second = failed("search-indexer", "ProviderSuspended");
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        let listed = store.list("search-indexer", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message_id, first.message_id);

        assert_eq!(store.list("search-indexer", 1).await.unwrap().len(), 1);
        assert!(store.list("other", 10).await.unwrap().is_empty());

        let taken = store.take("search-indexer", first.message_id).await.unwrap();
        assert!(taken.is_some());
        assert!(store.take("search-indexer", first.message_id).await.unwrap().is_none());
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_replaces_same_message() {
        let store = InMemoryDeadLetterStore::default();
        let mut info = failed("q", "ProviderApproved");
        store.append(&info).await.unwrap();
        info.attempt_count = 4;
        store.append(&info).await.unwrap();

        let listed = store.list("q", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].attempt_count, 4);
    }

    #[tokio::test]
    async fn test_max_length_drops_oldest() {
        let store = InMemoryDeadLetterStore::new(2);
        let records: Vec<_> = (0..3).map(|_| failed("q", "ProviderApproved")).collect();
        for record in &records {
            store.append(record).await.unwrap();
        }
        let listed = store.list("q", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message_id, records[1].message_id);
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_nothing() {
        let store = std::sync::Arc::new(InMemoryDeadLetterStore::default());
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let store = store.clone();
            tasks.spawn(async move { store.append(&failed("q", "ProviderApproved")).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }
        assert_eq!(store.all().await.unwrap().len(), 50);
    }
}

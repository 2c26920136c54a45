//! Dead Letter Queue (DLQ) service
//!
//! Holds messages that exhausted their retries or failed permanently, and
//! lets operators list, reprocess and purge them.
//!
//! Records are grouped by dead letter queue: the subscription name for topic
//! consumers, the queue name for point-to-point consumers.

mod redis_store;
mod store;

pub use redis_store::RedisDeadLetterStore;
pub use store::{DeadLetterStore, InMemoryDeadLetterStore};

use crate::envelope::RawEnvelope;
use crate::error::{BusError, FailureKind};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::transport::{DeliverySource, Transport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A dead-lettered message with its failure context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMessageInfo {
    pub message_id: Uuid,
    pub message_type: String,
    /// Dead letter queue this record belongs to
    pub queue: String,
    /// Where the message was consumed from, used to re-enqueue it
    pub source: DeliverySource,
    pub failure_reason: String,
    pub failure_kind: FailureKind,
    pub handler_type: String,
    pub attempt_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub envelope: RawEnvelope,
}

impl FailedMessageInfo {
    pub fn from_failure(
        envelope: &RawEnvelope,
        source: &DeliverySource,
        error: &BusError,
        handler_type: &str,
        failed_at: DateTime<Utc>,
    ) -> Self {
        let failure_reason = match envelope.decode_error() {
            Some(reason) => format!("{error} ({reason})"),
            None => error.to_string(),
        };
        Self {
            message_id: envelope.message_id(),
            message_type: envelope.message_type().to_string(),
            queue: source.dead_letter_queue().to_string(),
            source: source.clone(),
            failure_reason,
            failure_kind: error.failure_kind(),
            handler_type: handler_type.to_string(),
            attempt_count: envelope.attempt_count(),
            first_failed_at: envelope.first_failed_at().unwrap_or(failed_at),
            last_failed_at: failed_at,
            correlation_id: envelope.correlation_id(),
            envelope: envelope.clone(),
        }
    }
}

/// Aggregate view over every dead letter queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterStatistics {
    pub total_dead_lettered: u64,
    pub by_message_type: BTreeMap<String, u64>,
    pub by_queue: BTreeMap<String, u64>,
    pub oldest_unprocessed_at: Option<DateTime<Utc>>,
}

impl DeadLetterStatistics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a FailedMessageInfo>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total_dead_lettered += 1;
            *stats
                .by_message_type
                .entry(record.message_type.clone())
                .or_default() += 1;
            *stats.by_queue.entry(record.queue.clone()).or_default() += 1;
            stats.oldest_unprocessed_at = Some(match stats.oldest_unprocessed_at {
                Some(oldest) => oldest.min(record.first_failed_at),
                None => record.first_failed_at,
            });
        }
        stats
    }
}

/// Result of a reprocess request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReprocessOutcome {
    /// The message was re-enqueued to its original source
    Requeued,
    /// No such record, possibly already reprocessed or purged
    NotFound,
}

/// Dead letter handling and operator actions
#[async_trait]
pub trait DeadLetterService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Retry policy consulted by the delivery pipeline
    fn retry_policy(&self) -> &RetryPolicy;

    /// Record a message that will not be retried
    async fn send_to_dead_letter(
        &self,
        envelope: &RawEnvelope,
        error: &BusError,
        handler_type: &str,
        source: &DeliverySource,
    ) -> Result<(), BusError>;

    /// Oldest first, at most `max_count`
    async fn list_dead_letter_messages(
        &self,
        queue: &str,
        max_count: usize,
    ) -> Result<Vec<FailedMessageInfo>, BusError>;

    /// Re-enqueue a dead-lettered message with its attempt count reset.
    /// Reprocessing an id that is no longer present is a no-op.
    async fn reprocess_dead_letter_message(
        &self,
        queue: &str,
        message_id: Uuid,
    ) -> Result<ReprocessOutcome, BusError>;

    /// Remove a record without reprocessing. Returns whether one was removed.
    async fn purge_dead_letter_message(&self, queue: &str, message_id: Uuid)
    -> Result<bool, BusError>;

    async fn get_dead_letter_statistics(&self) -> Result<DeadLetterStatistics, BusError>;
}

/// Discards dead letters. Used when no transport is configured.
#[derive(Debug, Clone, Default)]
pub struct NoOpDeadLetterService {
    policy: RetryPolicy,
}

impl NoOpDeadLetterService {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl DeadLetterService for NoOpDeadLetterService {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn send_to_dead_letter(
        &self,
        envelope: &RawEnvelope,
        error: &BusError,
        handler_type: &str,
        source: &DeliverySource,
    ) -> Result<(), BusError> {
        warn!(
            message_id = %envelope.message_id(),
            message_type = %envelope.message_type(),
            queue = %source.dead_letter_queue(),
            handler = %handler_type,
            error = %error,
            "Dead letter discarded (no-op DLQ)"
        );
        Ok(())
    }

    async fn list_dead_letter_messages(
        &self,
        _queue: &str,
        _max_count: usize,
    ) -> Result<Vec<FailedMessageInfo>, BusError> {
        Ok(Vec::new())
    }

    async fn reprocess_dead_letter_message(
        &self,
        _queue: &str,
        _message_id: Uuid,
    ) -> Result<ReprocessOutcome, BusError> {
        Ok(ReprocessOutcome::NotFound)
    }

    async fn purge_dead_letter_message(
        &self,
        _queue: &str,
        _message_id: Uuid,
    ) -> Result<bool, BusError> {
        Ok(false)
    }

    async fn get_dead_letter_statistics(&self) -> Result<DeadLetterStatistics, BusError> {
        Ok(DeadLetterStatistics::default())
    }
}

/// Dead letter service over a [`DeadLetterStore`]
///
/// Reprocessing needs a transport; without one it fails with an operational error
/// and the record stays put.
pub struct StoreDeadLetterService {
    store: Arc<dyn DeadLetterStore>,
    transport: Option<Arc<dyn Transport>>,
    policy: RetryPolicy,
}

impl StoreDeadLetterService {
    pub fn new(store: Arc<dyn DeadLetterStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            transport: None,
            policy,
        }
    }

    /// Transport used to re-enqueue reprocessed messages
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    fn operational(context: &str, err: BusError) -> BusError {
        match err {
            BusError::Operational(_) => err,
            other => BusError::Operational(format!("{context}: {other}")),
        }
    }
}

#[async_trait]
impl DeadLetterService for StoreDeadLetterService {
    fn name(&self) -> &'static str {
        self.store.name()
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn send_to_dead_letter(
        &self,
        envelope: &RawEnvelope,
        error: &BusError,
        handler_type: &str,
        source: &DeliverySource,
    ) -> Result<(), BusError> {
        let info =
            FailedMessageInfo::from_failure(envelope, source, error, handler_type, Utc::now());
        self.store
            .append(&info)
            .await
            .map_err(|e| Self::operational("DLQ write failed", e))?;

        metrics::record_dead_lettered(&info.queue, &info.message_type, info.failure_kind);
        info!(
            message_id = %info.message_id,
            message_type = %info.message_type,
            queue = %info.queue,
            handler = %info.handler_type,
            attempt_count = info.attempt_count,
            failure_kind = %info.failure_kind,
            error = %info.failure_reason,
            "Moved message to DLQ"
        );
        Ok(())
    }

    async fn list_dead_letter_messages(
        &self,
        queue: &str,
        max_count: usize,
    ) -> Result<Vec<FailedMessageInfo>, BusError> {
        self.store
            .list(queue, max_count)
            .await
            .map_err(|e| Self::operational("DLQ list failed", e))
    }

    async fn reprocess_dead_letter_message(
        &self,
        queue: &str,
        message_id: Uuid,
    ) -> Result<ReprocessOutcome, BusError> {
        let Some(transport) = &self.transport else {
            return Err(BusError::operational("no transport configured for reprocessing"));
        };

        let Some(info) = self
            .store
            .take(queue, message_id)
            .await
            .map_err(|e| Self::operational("DLQ claim failed", e))?
        else {
            debug!(queue = %queue, message_id = %message_id, "Nothing to reprocess");
            metrics::record_reprocessed(queue, "not_found");
            return Ok(ReprocessOutcome::NotFound);
        };

        let envelope = info.envelope.clone().reset_for_reprocess();
        if let Err(e) = transport.redeliver(&info.source, &envelope).await {
            error!(
                queue = %queue,
                message_id = %message_id,
                error = %e,
                "Reprocess failed, restoring DLQ entry"
            );
            if let Err(restore) = self.store.append(&info).await {
                error!(
                    queue = %queue,
                    message_id = %message_id,
                    error = %restore,
                    "Failed to restore DLQ entry"
                );
            }
            return Err(BusError::Operational(format!("reprocess failed: {e}")));
        }

        metrics::record_reprocessed(queue, "requeued");
        info!(
            queue = %queue,
            message_id = %message_id,
            destination = %info.source.destination,
            "Reprocessed message from DLQ"
        );
        Ok(ReprocessOutcome::Requeued)
    }

    async fn purge_dead_letter_message(
        &self,
        queue: &str,
        message_id: Uuid,
    ) -> Result<bool, BusError> {
        let removed = self
            .store
            .take(queue, message_id)
            .await
            .map_err(|e| Self::operational("DLQ purge failed", e))?
            .is_some();
        if removed {
            metrics::record_purged(queue);
            info!(queue = %queue, message_id = %message_id, "Purged message from DLQ");
        }
        Ok(removed)
    }

    async fn get_dead_letter_statistics(&self) -> Result<DeadLetterStatistics, BusError> {
        let records = self
            .store
            .all()
            .await
            .map_err(|e| Self::operational("DLQ statistics failed", e))?;
        Ok(DeadLetterStatistics::from_records(&records))
    }
}

//! Delivery pipeline
//!
//! Drives one message through its handler: run, classify the failure, wait
//! and retry while the policy allows, otherwise hand it to the DLQ.
//! Outbound sends use the same policy against transport failures.

use crate::bus::RawMessageHandler;
use crate::cancel::Cancellation;
use crate::dlq::DeadLetterService;
use crate::envelope::RawEnvelope;
use crate::error::BusError;
use crate::metrics::{self, HandlerMetrics};
use crate::retry::RetryPolicy;
use crate::transport::{DeliverySource, Destination, Transport};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Handler type recorded for messages that could not be published
pub const PUBLISHER_HANDLER: &str = "publisher";

/// How an inbound message was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Handler succeeded
    Delivered,
    /// Recorded in the DLQ
    DeadLettered,
    /// Must go back to the transport (DLQ write failed)
    Requeue,
    /// Cancellation fired mid-delivery
    Cancelled,
    /// Not for this subscription
    Skipped,
}

impl DeliveryOutcome {
    /// Whether the transport should consider the message consumed
    pub fn should_ack(self) -> bool {
        matches!(
            self,
            DeliveryOutcome::Delivered | DeliveryOutcome::DeadLettered | DeliveryOutcome::Skipped
        )
    }
}

/// Retry and dead letter orchestration shared by every subscription
pub struct DeliveryPipeline {
    dead_letters: Arc<dyn DeadLetterService>,
}

impl DeliveryPipeline {
    pub fn new(dead_letters: Arc<dyn DeadLetterService>) -> Self {
        Self { dead_letters }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.dead_letters.retry_policy()
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterService> {
        &self.dead_letters
    }

    /// Run the handler until it succeeds, the policy gives up, or `cancel` fires
    pub async fn deliver(
        &self,
        mut envelope: RawEnvelope,
        handler: &dyn RawMessageHandler,
        source: &DeliverySource,
        metrics: &HandlerMetrics,
        cancel: &Cancellation,
    ) -> DeliveryOutcome {
        let policy = *self.retry_policy();

        loop {
            let started = Instant::now();
            let result = cancel.run(handler.handle_raw(&envelope)).await;

            let err = match result {
                Ok(()) => {
                    metrics.handled("success", started.elapsed());
                    debug!(
                        message_id = %envelope.message_id(),
                        handler = %handler.handler_type(),
                        attempt_count = envelope.attempt_count(),
                        "Message handled"
                    );
                    return DeliveryOutcome::Delivered;
                }
                Err(e) if e.is_cancelled() => {
                    metrics.handled("cancelled", started.elapsed());
                    return DeliveryOutcome::Cancelled;
                }
                Err(e) => e,
            };

            metrics.handled("failed", started.elapsed());
            envelope.mark_failed(Utc::now());
            let attempt_count = envelope.attempt_count();
            let kind = err.failure_kind();

            if !policy.should_retry(kind, attempt_count) {
                return self
                    .dead_letter(&envelope, &err, handler.handler_type(), source)
                    .await;
            }

            let delay = policy.calculate_retry_delay(attempt_count);
            warn!(
                message_id = %envelope.message_id(),
                handler = %handler.handler_type(),
                attempt_count,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Handler failed, retrying"
            );
            metrics.retried(attempt_count);

            if cancel.sleep(delay).await.is_err() {
                return DeliveryOutcome::Cancelled;
            }
            envelope = envelope.next_attempt();
        }
    }

    /// Record `envelope` in the DLQ. A failed write asks for a requeue so the
    /// message is not lost.
    pub async fn dead_letter(
        &self,
        envelope: &RawEnvelope,
        err: &BusError,
        handler_type: &str,
        source: &DeliverySource,
    ) -> DeliveryOutcome {
        match self.write_dead_letter(envelope, err, handler_type, source).await {
            Ok(()) => DeliveryOutcome::DeadLettered,
            Err(_) => DeliveryOutcome::Requeue,
        }
    }

    async fn write_dead_letter(
        &self,
        envelope: &RawEnvelope,
        err: &BusError,
        handler_type: &str,
        source: &DeliverySource,
    ) -> Result<(), BusError> {
        let result = self
            .dead_letters
            .send_to_dead_letter(envelope, err, handler_type, source)
            .await;
        if let Err(e) = &result {
            error!(
                message_id = %envelope.message_id(),
                queue = %source.dead_letter_queue(),
                error = %e,
                "Failed to write DLQ entry"
            );
        }
        result
    }

    /// Deliver to the transport, retrying transient failures. Once the policy
    /// gives up the message is dead-lettered against its destination and the
    /// last transport error is returned, wrapped in
    /// [`BusError::NotDeadLettered`] when the DLQ write failed too.
    pub async fn deliver_outbound(
        &self,
        transport: &dyn Transport,
        destination: &Destination,
        envelope: &RawEnvelope,
        cancel: &Cancellation,
    ) -> Result<(), BusError> {
        let policy = *self.retry_policy();
        // Failure history for the DLQ record; the wire copy stays untouched
        let mut tracked = envelope.clone();

        loop {
            let err = match cancel.run(transport.deliver(destination, envelope)).await {
                Ok(()) => {
                    metrics::record_outbound(destination, envelope.message_type(), "success");
                    debug!(
                        message_id = %envelope.message_id(),
                        destination = %destination,
                        transport = %transport.name(),
                        "Message sent"
                    );
                    return Ok(());
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };

            tracked.mark_failed(Utc::now());
            let attempt_count = tracked.attempt_count();

            if policy.should_retry(err.failure_kind(), attempt_count) {
                let delay = policy.calculate_retry_delay(attempt_count);
                warn!(
                    message_id = %envelope.message_id(),
                    destination = %destination,
                    attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Send failed, retrying"
                );
                cancel.sleep(delay).await?;
                tracked = tracked.next_attempt();
                continue;
            }

            metrics::record_outbound(destination, envelope.message_type(), "failed");
            let source = DeliverySource {
                destination: destination.clone(),
                subscription: None,
            };
            return match self
                .write_dead_letter(&tracked, &err, PUBLISHER_HANDLER, &source)
                .await
            {
                Ok(()) => Err(err),
                Err(dead_letter) => Err(BusError::NotDeadLettered {
                    error: Box::new(err),
                    dead_letter: Box::new(dead_letter),
                }),
            };
        }
    }
}

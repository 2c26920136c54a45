//! Subscription runtime
//!
//! One reader task per subscription pulls from the inbox. A semaphore bounds
//! handler executions in flight; each runs in a `JoinSet` so shutdown can
//! drain them.

use super::RawMessageHandler;
use crate::cancel::Cancellation;
use crate::error::BusError;
use crate::metrics::HandlerMetrics;
use crate::pipeline::{DeliveryOutcome, DeliveryPipeline};
use crate::transport::{Acknowledger, DeliverySource, InboundMessage, Inbox};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

// Pause after an inbox error before reading again
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Everything a handler execution needs, shared across tasks
pub(crate) struct SubscriptionContext {
    pub name: String,
    pub event_type: String,
    pub source: DeliverySource,
    pub max_concurrent_calls: usize,
    pub handler: Arc<dyn RawMessageHandler>,
    pub pipeline: Arc<DeliveryPipeline>,
    pub metrics: HandlerMetrics,
}

impl SubscriptionContext {
    async fn process(&self, message: InboundMessage, cancel: &Cancellation) {
        let InboundMessage { envelope, acker } = message;

        let outcome = if envelope.is_quarantined() {
            warn!(
                subscription = %self.name,
                message_id = %envelope.message_id(),
                error = envelope.decode_error().unwrap_or_default(),
                "Undecodable message body"
            );
            self.pipeline
                .dead_letter(
                    &envelope,
                    &BusError::Serialization("undecodable message body".into()),
                    self.handler.handler_type(),
                    &self.source,
                )
                .await
        } else if envelope.message_type() != self.event_type {
            if self.source.destination.is_topic() {
                // Consumer-side filtering on shared topics
                debug!(
                    subscription = %self.name,
                    message_type = %envelope.message_type(),
                    "Skipping message for another event type"
                );
                DeliveryOutcome::Skipped
            } else {
                self.pipeline
                    .dead_letter(
                        &envelope,
                        &BusError::UnknownMessageType(envelope.message_type().to_string()),
                        self.handler.handler_type(),
                        &self.source,
                    )
                    .await
            }
        } else {
            self.metrics.received();
            self.pipeline
                .deliver(
                    envelope.clone(),
                    self.handler.as_ref(),
                    &self.source,
                    &self.metrics,
                    cancel,
                )
                .await
        };

        self.settle(acker.as_ref(), outcome, envelope.message_id()).await;
    }

    async fn settle(
        &self,
        acker: &dyn Acknowledger,
        outcome: DeliveryOutcome,
        message_id: uuid::Uuid,
    ) {
        let result = if outcome.should_ack() {
            acker.ack().await
        } else {
            acker.requeue().await
        };
        if let Err(e) = result {
            error!(
                subscription = %self.name,
                message_id = %message_id,
                outcome = %outcome,
                error = %e,
                "Failed to settle message"
            );
        }
    }
}

/// Reader loop. Returns once `cancel` or `stop` fires or the inbox closes,
/// after every in-flight handler has settled.
pub(crate) async fn run_subscription(
    mut inbox: Box<dyn Inbox>,
    context: Arc<SubscriptionContext>,
    cancel: Cancellation,
    stop: Cancellation,
) {
    let semaphore = Arc::new(Semaphore::new(context.max_concurrent_calls.max(1)));
    let mut tasks = JoinSet::new();

    info!(
        subscription = %context.name,
        event_type = %context.event_type,
        source = %context.source.destination,
        max_concurrent_calls = context.max_concurrent_calls,
        "Subscription started"
    );

    loop {
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                error!(subscription = %context.name, error = %e, "Handler task panicked");
            }
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = stop.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = stop.cancelled() => break,
            next = inbox.next() => next,
        };

        match next {
            Ok(Some(message)) => {
                let context = context.clone();
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    context.process(message, &cancel).await;
                });
            }
            Ok(None) => {
                info!(subscription = %context.name, "Inbox closed");
                break;
            }
            Err(e) => {
                error!(subscription = %context.name, error = %e, "Error reading from inbox");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    let in_flight = tasks.len();
    if in_flight > 0 {
        info!(subscription = %context.name, in_flight, "Draining in-flight handlers");
    }
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(subscription = %context.name, error = %e, "Handler task panicked");
        }
    }
    info!(subscription = %context.name, "Subscription stopped");
}

//! Message bus that validates and discards

use super::transport_bus::{Target, resolve_destination, resolve_source};
use super::{MessageBus, RawMessageHandler, Subscription, SubscriptionHandle};
use crate::cancel::Cancellation;
use crate::config::BusOptions;
use crate::envelope::RawEnvelope;
use crate::error::BusError;
use crate::topic::TopicStrategySelector;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Bus used in tests and when messaging is disabled. Applies the same
/// registry and topic validation as the real bus, then does nothing.
pub struct NoOpMessageBus {
    topics: Arc<TopicStrategySelector>,
    options: BusOptions,
}

impl NoOpMessageBus {
    pub fn new(topics: Arc<TopicStrategySelector>, options: BusOptions) -> Self {
        Self { topics, options }
    }
}

#[async_trait]
impl MessageBus for NoOpMessageBus {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn topics(&self) -> &TopicStrategySelector {
        &self.topics
    }

    async fn send_raw(
        &self,
        envelope: RawEnvelope,
        queue: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<(), BusError> {
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        let destination =
            resolve_destination(&self.topics, &self.options, &envelope, Target::Queue(queue))?;
        debug!(
            message_id = %envelope.message_id(),
            destination = %destination,
            "Send discarded (no-op bus)"
        );
        Ok(())
    }

    async fn publish_raw(
        &self,
        envelope: RawEnvelope,
        topic: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<(), BusError> {
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        let destination =
            resolve_destination(&self.topics, &self.options, &envelope, Target::Topic(topic))?;
        debug!(
            message_id = %envelope.message_id(),
            destination = %destination,
            "Publish discarded (no-op bus)"
        );
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        subscription: Subscription,
        _handler: Arc<dyn RawMessageHandler>,
        _cancel: Cancellation,
    ) -> Result<SubscriptionHandle, BusError> {
        let source = resolve_source(&self.topics, &self.options, &subscription)?;
        debug!(subscription = %source.dead_letter_queue(), "Subscription inert (no-op bus)");
        Ok(SubscriptionHandle::inert(
            source.dead_letter_queue(),
            subscription.event_type(),
        ))
    }
}

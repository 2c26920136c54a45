//! Message bus over a [`Transport`]

use super::runtime::{SubscriptionContext, run_subscription};
use super::{MessageBus, RawMessageHandler, Subscription, SubscriptionHandle};
use crate::cancel::Cancellation;
use crate::config::BusOptions;
use crate::dlq::DeadLetterService;
use crate::envelope::RawEnvelope;
use crate::error::BusError;
use crate::metrics::HandlerMetrics;
use crate::pipeline::DeliveryPipeline;
use crate::topic::{TopicStrategySelector, kebab_case};
use crate::transport::{DeliverySource, Destination, SubscriptionSpec, Transport};
use async_trait::async_trait;
use core_config::ConfigError;
use std::sync::Arc;
use tracing::{debug, info};

/// Production message bus: registry validation and topic routing in front of
/// a transport, retries and dead-lettering behind it
pub struct TransportMessageBus {
    transport: Arc<dyn Transport>,
    topics: Arc<TopicStrategySelector>,
    pipeline: Arc<DeliveryPipeline>,
    options: BusOptions,
}

impl TransportMessageBus {
    pub fn new(
        transport: Arc<dyn Transport>,
        topics: Arc<TopicStrategySelector>,
        dead_letters: Arc<dyn DeadLetterService>,
        options: BusOptions,
    ) -> Self {
        Self {
            transport,
            topics,
            pipeline: Arc::new(DeliveryPipeline::new(dead_letters)),
            options,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn options(&self) -> &BusOptions {
        &self.options
    }
}

/// Resolve where a subscription reads from, validating its event type
pub(crate) fn resolve_source(
    topics: &TopicStrategySelector,
    options: &BusOptions,
    subscription: &Subscription,
) -> Result<DeliverySource, ConfigError> {
    topics.registry().require(subscription.event_type())?;

    match subscription {
        Subscription::Topic { event_type, name } => {
            let topic = topics.select_topic_for_event(event_type)?;
            let name = match name {
                Some(name) => non_empty("subscription name", name)?.to_string(),
                None => format!("{}-{}", options.service_name, kebab_case(event_type)),
            };
            Ok(DeliverySource::subscription(topic, name))
        }
        Subscription::Queue { queue, .. } => {
            let queue = match queue {
                Some(queue) => non_empty("queue name", queue)?,
                None => options.default_queue.as_str(),
            };
            Ok(DeliverySource::queue(queue))
        }
    }
}

/// Resolve and validate an outbound destination
pub(crate) fn resolve_destination(
    topics: &TopicStrategySelector,
    options: &BusOptions,
    envelope: &RawEnvelope,
    target: Target<'_>,
) -> Result<Destination, ConfigError> {
    topics.registry().require(envelope.message_type())?;

    Ok(match target {
        Target::Queue(Some(queue)) => {
            Destination::Queue(non_empty("queue name", queue)?.to_string())
        }
        Target::Queue(None) => Destination::Queue(options.default_queue.clone()),
        Target::Topic(Some(topic)) => {
            Destination::Topic(non_empty("topic name", topic)?.to_string())
        }
        Target::Topic(None) => {
            Destination::Topic(topics.select_topic_for_event(envelope.message_type())?)
        }
    })
}

pub(crate) enum Target<'a> {
    Queue(Option<&'a str>),
    Topic(Option<&'a str>),
}

fn non_empty<'a>(what: &str, value: &'a str) -> Result<&'a str, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{what} must not be empty")));
    }
    Ok(value)
}

#[async_trait]
impl MessageBus for TransportMessageBus {
    fn name(&self) -> &'static str {
        self.transport.name()
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
        let destination =
            resolve_destination(&self.topics, &self.options, &envelope, Target::Queue(queue))?;
        debug!(message_id = %envelope.message_id(), destination = %destination, "Sending message");
        self.pipeline
            .deliver_outbound(self.transport.as_ref(), &destination, &envelope, cancel)
            .await
    }

    async fn publish_raw(
        &self,
        envelope: RawEnvelope,
        topic: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<(), BusError> {
        let destination =
            resolve_destination(&self.topics, &self.options, &envelope, Target::Topic(topic))?;
        debug!(message_id = %envelope.message_id(), destination = %destination, "Publishing event");
        self.pipeline
            .deliver_outbound(self.transport.as_ref(), &destination, &envelope, cancel)
            .await
    }

    async fn subscribe_raw(
        &self,
        subscription: Subscription,
        handler: Arc<dyn RawMessageHandler>,
        cancel: Cancellation,
    ) -> Result<SubscriptionHandle, BusError> {
        let source = resolve_source(&self.topics, &self.options, &subscription)?;
        let event_type = subscription.event_type().to_string();
        let name = source.dead_letter_queue().to_string();

        let spec = SubscriptionSpec {
            source: source.clone(),
            event_type: event_type.clone(),
            max_concurrent_calls: self.options.max_concurrent_calls,
        };
        let inbox = cancel.run(self.transport.open_inbox(&spec)).await?;

        let context = Arc::new(SubscriptionContext {
            name: name.clone(),
            event_type: event_type.clone(),
            source,
            max_concurrent_calls: self.options.max_concurrent_calls,
            handler,
            pipeline: self.pipeline.clone(),
            metrics: HandlerMetrics::new(name.clone(), event_type.clone()),
        });

        let (stop_tx, stop) = Cancellation::channel();
        let task = tokio::spawn(run_subscription(inbox, context, cancel, stop));

        info!(
            subscription = %name,
            event_type = %event_type,
            transport = %self.transport.name(),
            "Subscribed"
        );
        Ok(SubscriptionHandle::running(name, event_type, stop_tx, task))
    }
}

//! Message bus
//!
//! [`MessageBus`] is the object-safe surface over raw envelopes that transports
//! plug into. Modules use the typed [`MessageBusExt`] methods:
//!
//! ```rust,ignore
//! let cancel = Cancellation::none();
//! bus.publish(ProviderApproved { provider_id }, None, &cancel).await?;
//! bus.send(ReindexCatalog { catalog_id }, Some("search-commands"), &cancel).await?;
//!
//! let handle = bus
//!     .subscribe::<ProviderApproved, _>(IndexProvider::new(index), None, cancel)
//!     .await?;
//! // ...
//! handle.shutdown().await;
//! ```

mod handler;
mod noop;
mod runtime;
mod transport_bus;

pub use handler::{MessageHandler, RawMessageHandler, TypedHandler};
pub use noop::NoOpMessageBus;
pub use transport_bus::TransportMessageBus;

use crate::cancel::Cancellation;
use crate::envelope::{IntegrationEvent, MessageEnvelope, RawEnvelope};
use crate::error::BusError;
use crate::topic::TopicStrategySelector;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// What a subscriber listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// Broadcast events on the topic chosen by the topic strategy.
    /// Defaults to `{service}-{event-type}` when unnamed.
    Topic {
        event_type: String,
        name: Option<String>,
    },
    /// Point-to-point messages on a queue. Defaults to the bus's default queue.
    Queue {
        message_type: String,
        queue: Option<String>,
    },
}

impl Subscription {
    pub fn topic(event_type: impl Into<String>, name: Option<&str>) -> Self {
        Subscription::Topic {
            event_type: event_type.into(),
            name: name.map(str::to_string),
        }
    }

    pub fn queue(message_type: impl Into<String>, queue: Option<&str>) -> Self {
        Subscription::Queue {
            message_type: message_type.into(),
            queue: queue.map(str::to_string),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Subscription::Topic { event_type, .. } => event_type,
            Subscription::Queue { message_type, .. } => message_type,
        }
    }
}

/// Bus over raw envelopes
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Implementation name for logging and the operator surface
    fn name(&self) -> &'static str;

    /// Topic routing shared with the factory and admin surface
    fn topics(&self) -> &TopicStrategySelector;

    /// Point-to-point send. `queue` defaults to the configured default queue.
    async fn send_raw(
        &self,
        envelope: RawEnvelope,
        queue: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<(), BusError>;

    /// Broadcast. `topic` overrides the topic strategy.
    async fn publish_raw(
        &self,
        envelope: RawEnvelope,
        topic: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<(), BusError>;

    /// Start consuming. The subscription runs until `cancel` fires or the
    /// returned handle is shut down.
    async fn subscribe_raw(
        &self,
        subscription: Subscription,
        handler: Arc<dyn RawMessageHandler>,
        cancel: Cancellation,
    ) -> Result<SubscriptionHandle, BusError>;
}

/// Typed API over any [`MessageBus`]
#[async_trait]
pub trait MessageBusExt: MessageBus {
    async fn send<M: IntegrationEvent>(
        &self,
        message: M,
        destination_queue: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<(), BusError> {
        self.send_envelope(MessageEnvelope::new(message), destination_queue, cancel)
            .await
    }

    async fn send_envelope<M: IntegrationEvent>(
        &self,
        envelope: MessageEnvelope<M>,
        destination_queue: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<(), BusError> {
        self.send_raw(envelope.to_raw()?, destination_queue, cancel).await
    }

    async fn publish<E: IntegrationEvent>(
        &self,
        event: E,
        topic_override: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<(), BusError> {
        self.publish_envelope(MessageEnvelope::new(event), topic_override, cancel)
            .await
    }

    async fn publish_envelope<E: IntegrationEvent>(
        &self,
        envelope: MessageEnvelope<E>,
        topic_override: Option<&str>,
        cancel: &Cancellation,
    ) -> Result<(), BusError> {
        self.publish_raw(envelope.to_raw()?, topic_override, cancel).await
    }

    async fn subscribe<E, H>(
        &self,
        handler: H,
        subscription_name: Option<&str>,
        cancel: Cancellation,
    ) -> Result<SubscriptionHandle, BusError>
    where
        E: IntegrationEvent,
        H: MessageHandler<E>,
    {
        self.subscribe_raw(
            Subscription::topic(E::EVENT_TYPE, subscription_name),
            Arc::new(TypedHandler::<E, H>::new(handler)),
            cancel,
        )
        .await
    }

    async fn subscribe_queue<M, H>(
        &self,
        handler: H,
        queue: Option<&str>,
        cancel: Cancellation,
    ) -> Result<SubscriptionHandle, BusError>
    where
        M: IntegrationEvent,
        H: MessageHandler<M>,
    {
        self.subscribe_raw(
            Subscription::queue(M::EVENT_TYPE, queue),
            Arc::new(TypedHandler::<M, H>::new(handler)),
            cancel,
        )
        .await
    }
}

impl<B: MessageBus + ?Sized> MessageBusExt for B {}

/// Running subscription. Dropping the handle detaches the subscription; use
/// [`SubscriptionHandle::shutdown`] to stop it and wait for in-flight work.
#[derive(Debug)]
pub struct SubscriptionHandle {
    name: String,
    event_type: String,
    stop: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn running(
        name: String,
        event_type: String,
        stop: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            name,
            event_type,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Handle for a subscription that does no work
    pub fn inert(name: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            event_type: event_type.into(),
            stop: None,
            task: None,
        }
    }

    /// Subscription (or queue) name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Stop reading and wait for in-flight handlers to settle
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(true);
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(subscription = %self.name, error = %e, "Subscription task panicked");
        }
    }
}

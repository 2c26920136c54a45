//! Transport abstraction
//!
//! A transport moves [`RawEnvelope`]s to queues and topics and hands inbound
//! messages to subscriptions. It knows nothing about retries or the DLQ; the
//! bus drives those through the delivery pipeline.

mod memory;
mod rabbitmq;
mod redis_streams;

pub use memory::InMemoryTransport;
pub use rabbitmq::RabbitMqTransport;
pub use redis_streams::RedisStreamsTransport;

use crate::envelope::RawEnvelope;
use crate::error::BusError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical destination on a transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Destination {
    /// Point-to-point, competing consumers
    Queue(String),
    /// Broadcast, one copy per subscription
    Topic(String),
}

impl Destination {
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name) | Destination::Topic(name) => name,
        }
    }

    pub fn is_topic(&self) -> bool {
        matches!(self, Destination::Topic(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "queue:{name}"),
            Destination::Topic(name) => write!(f, "topic:{name}"),
        }
    }
}

/// Where an inbound message was consumed from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliverySource {
    pub destination: Destination,
    /// Subscription name for topic consumers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
}

impl DeliverySource {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            destination: Destination::Queue(name.into()),
            subscription: None,
        }
    }

    pub fn subscription(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            destination: Destination::Topic(topic.into()),
            subscription: Some(subscription.into()),
        }
    }

    /// Name of the dead letter queue this source feeds: the subscription for
    /// topic consumers, the queue name otherwise.
    pub fn dead_letter_queue(&self) -> &str {
        self.subscription
            .as_deref()
            .unwrap_or_else(|| self.destination.name())
    }
}

/// Resolved subscription handed to [`Transport::open_inbox`]
#[derive(Debug, Clone)]
pub struct SubscriptionSpec {
    pub source: DeliverySource,
    pub event_type: String,
    /// Upper bound on unacknowledged messages in flight
    pub max_concurrent_calls: usize,
}

/// Settles an inbound message with the transport
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Processing finished (delivered, skipped, or dead-lettered)
    async fn ack(&self) -> Result<(), BusError>;

    /// Hand the message back for redelivery
    async fn requeue(&self) -> Result<(), BusError>;
}

/// A message pulled from an inbox, settled through its acknowledger
pub struct InboundMessage {
    pub envelope: RawEnvelope,
    pub acker: Box<dyn Acknowledger>,
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

/// Stream of inbound messages for one subscription
#[async_trait]
pub trait Inbox: Send {
    /// Next message, or `None` once the transport closed the inbox
    async fn next(&mut self) -> Result<Option<InboundMessage>, BusError>;
}

/// Transport adapter
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logging and the operator surface
    fn name(&self) -> &'static str;

    async fn deliver(&self, destination: &Destination, envelope: &RawEnvelope)
    -> Result<(), BusError>;

    /// Deliver a dead-lettered message back to where it was consumed from.
    /// Topic sources go to the named subscription only, not to every subscriber.
    async fn redeliver(&self, source: &DeliverySource, envelope: &RawEnvelope)
    -> Result<(), BusError>;

    async fn open_inbox(&self, spec: &SubscriptionSpec) -> Result<Box<dyn Inbox>, BusError>;
}

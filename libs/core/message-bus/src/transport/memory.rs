//! Process-local transport
//!
//! Queues are shared channels with competing consumers. Topics fan out one
//! copy per subscription name; messages published to a topic with no
//! subscriptions are dropped, as on a real broker.

use super::{
    Acknowledger, DeliverySource, Destination, InboundMessage, Inbox, SubscriptionSpec, Transport,
};
use crate::envelope::RawEnvelope;
use crate::error::{BusError, FailureKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

struct Channel {
    tx: mpsc::UnboundedSender<RawEnvelope>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RawEnvelope>>>,
}

impl Channel {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        })
    }

    fn push(&self, envelope: RawEnvelope) -> Result<(), BusError> {
        self.tx
            .send(envelope)
            .map_err(|_| BusError::unavailable("in-memory channel closed"))
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Arc<Channel>>,
    // topic -> subscription -> channel
    topics: HashMap<String, HashMap<String, Arc<Channel>>>,
    delivered: Vec<(Destination, RawEnvelope)>,
    failures: Vec<FailureKind>,
}

/// In-memory transport for tests and local runs
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-delivery
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every successful `deliver`/`redeliver`, in order
    pub fn delivered(&self) -> Vec<(Destination, RawEnvelope)> {
        self.lock().delivered.clone()
    }

    /// Make the next deliveries fail with the given kinds, in order
    pub fn fail_next_deliveries(&self, kinds: impl IntoIterator<Item = FailureKind>) {
        let mut state = self.lock();
        state.failures.extend(kinds);
    }

    fn queue_channel(state: &mut State, name: &str) -> Arc<Channel> {
        state
            .queues
            .entry(name.to_string())
            .or_insert_with(Channel::new)
            .clone()
    }

    fn subscription_channel(state: &mut State, topic: &str, subscription: &str) -> Arc<Channel> {
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .entry(subscription.to_string())
            .or_insert_with(Channel::new)
            .clone()
    }

    fn injected_failure(state: &mut State) -> Result<(), BusError> {
        if state.failures.is_empty() {
            return Ok(());
        }
        match state.failures.remove(0) {
            FailureKind::Transient => Err(BusError::unavailable("injected transient failure")),
            FailureKind::Permanent => Err(BusError::Transport {
                message: "injected permanent failure".into(),
                kind: FailureKind::Permanent,
            }),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn deliver(
        &self,
        destination: &Destination,
        envelope: &RawEnvelope,
    ) -> Result<(), BusError> {
        let mut state = self.lock();
        Self::injected_failure(&mut state)?;

        match destination {
            Destination::Queue(name) => {
                Self::queue_channel(&mut state, name).push(envelope.clone())?;
            }
            Destination::Topic(name) => {
                let subscribers: Vec<Arc<Channel>> = state
                    .topics
                    .get(name)
                    .map(|subs| subs.values().cloned().collect())
                    .unwrap_or_default();
                if subscribers.is_empty() {
                    debug!(topic = %name, "No subscriptions, message dropped");
                }
                for channel in subscribers {
                    channel.push(envelope.clone())?;
                }
            }
        }

        state.delivered.push((destination.clone(), envelope.clone()));
        Ok(())
    }

    async fn redeliver(
        &self,
        source: &DeliverySource,
        envelope: &RawEnvelope,
    ) -> Result<(), BusError> {
        let (Destination::Topic(topic), Some(subscription)) =
            (&source.destination, &source.subscription)
        else {
            return self.deliver(&source.destination, envelope).await;
        };

        let mut state = self.lock();
        Self::injected_failure(&mut state)?;
        Self::subscription_channel(&mut state, topic, subscription).push(envelope.clone())?;
        state
            .delivered
            .push((source.destination.clone(), envelope.clone()));
        Ok(())
    }

    async fn open_inbox(&self, spec: &SubscriptionSpec) -> Result<Box<dyn Inbox>, BusError> {
        let mut state = self.lock();
        let channel = match (&spec.source.destination, &spec.source.subscription) {
            (Destination::Topic(topic), Some(subscription)) => {
                Self::subscription_channel(&mut state, topic, subscription)
            }
            (Destination::Topic(topic), None) => {
                return Err(BusError::Config(core_config::ConfigError::Invalid(format!(
                    "subscription to topic '{topic}' needs a name"
                ))));
            }
            (Destination::Queue(name), _) => Self::queue_channel(&mut state, name),
        };
        Ok(Box::new(MemoryInbox { channel }))
    }
}

struct MemoryInbox {
    channel: Arc<Channel>,
}

#[async_trait]
impl Inbox for MemoryInbox {
    async fn next(&mut self) -> Result<Option<InboundMessage>, BusError> {
        let envelope = {
            let mut rx = self.channel.rx.lock().await;
            rx.recv().await
        };
        Ok(envelope.map(|envelope| InboundMessage {
            acker: Box::new(MemoryAcker {
                channel: self.channel.clone(),
                envelope: envelope.clone(),
            }),
            envelope,
        }))
    }
}

struct MemoryAcker {
    channel: Arc<Channel>,
    envelope: RawEnvelope,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn requeue(&self) -> Result<(), BusError> {
        self.channel.push(self.envelope.clone())
    }
}

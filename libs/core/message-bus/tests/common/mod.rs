//! Fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use message_bus::{
    BusError, BusOptions, DeadLetterService, EventTypeRegistry, IntegrationEvent,
    MessageEnvelope, MessageHandler, RetryPolicy, StoreDeadLetterService, TopicStrategy,
    TopicStrategySelector, TransportMessageBus,
    dlq::InMemoryDeadLetterStore,
    transport::{InMemoryTransport, Transport},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

pub const TOPIC: &str = "marketplace-events";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderApproved {
    pub provider_id: Uuid,
}

impl IntegrationEvent for ProviderApproved {
    const EVENT_TYPE: &'static str = "ProviderApproved";
    const MODULE: &'static str = "Providers";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVerified {
    pub document_id: Uuid,
}

impl IntegrationEvent for DocumentVerified {
    const EVENT_TYPE: &'static str = "DocumentVerified";
    const MODULE: &'static str = "Documents";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexCatalog {
    pub catalog_id: Uuid,
}

impl IntegrationEvent for ReindexCatalog {
    const EVENT_TYPE: &'static str = "ReindexCatalog";
    const MODULE: &'static str = "ServiceCatalogs";
}

pub fn registry() -> Arc<EventTypeRegistry> {
    Arc::new(
        EventTypeRegistry::builder()
            .register::<ProviderApproved>()
            .register::<DocumentVerified>()
            .register::<ReindexCatalog>()
            .build()
            .unwrap(),
    )
}

/// Retries fast enough for tests, same shape as the default policy
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4))
}

pub struct Harness {
    pub transport: InMemoryTransport,
    pub dead_letters: Arc<dyn DeadLetterService>,
    pub bus: TransportMessageBus,
}

pub fn harness() -> Harness {
    harness_with(BusOptions::new("search").with_default_queue("search-commands"))
}

pub fn harness_with(options: BusOptions) -> Harness {
    let transport = InMemoryTransport::new();
    let shared: Arc<dyn Transport> = Arc::new(transport.clone());
    let store = Arc::new(InMemoryDeadLetterStore::default());
    let dead_letters: Arc<dyn DeadLetterService> =
        Arc::new(StoreDeadLetterService::new(store, fast_policy()).with_transport(shared.clone()));
    let topics = TopicStrategySelector::new(TopicStrategy::single(TOPIC), registry()).unwrap();
    let bus = TransportMessageBus::new(shared, Arc::new(topics), dead_letters.clone(), options);
    Harness {
        transport,
        dead_letters,
        bus,
    }
}

/// How a [`Scripted`] handler answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Succeed,
    FailTransient,
    FailPermanent,
    /// Transient failures for the first N calls, then success
    FailTimes(u32),
}

/// Handler that counts calls and answers from a script that can be swapped
#[derive(Clone)]
pub struct Scripted {
    calls: Arc<AtomicUsize>,
    successes: Arc<AtomicUsize>,
    mode: Arc<AtomicU32>,
    script: Arc<std::sync::Mutex<Script>>,
}

impl Scripted {
    pub fn new(script: Script) -> Self {
        Self {
            calls: Arc::default(),
            successes: Arc::default(),
            mode: Arc::default(),
            script: Arc::new(std::sync::Mutex::new(script)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
        self.mode.store(0, Ordering::SeqCst);
    }

    fn answer(&self) -> Result<(), BusError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = *self.script.lock().unwrap();
        let result = match script {
            Script::Succeed => Ok(()),
            Script::FailTransient => Err(BusError::transient("search index unavailable")),
            Script::FailPermanent => Err(BusError::permanent("provider record is invalid")),
            Script::FailTimes(n) => {
                if self.mode.fetch_add(1, Ordering::SeqCst) < n {
                    Err(BusError::transient("search index unavailable"))
                } else {
                    Ok(())
                }
            }
        };
        if result.is_ok() {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl<E: IntegrationEvent> MessageHandler<E> for Scripted {
    async fn handle(&self, _envelope: &MessageEnvelope<E>) -> Result<(), BusError> {
        self.answer()
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

/// Handler that holds every call until released, tracking the peak number
/// of calls running at once
#[derive(Clone)]
pub struct Gated {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    release: watch::Sender<bool>,
}

impl Gated {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::default(),
            peak: Arc::default(),
            completed: Arc::default(),
            release: watch::channel(false).0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.release.send_replace(true);
    }
}

#[async_trait]
impl<E: IntegrationEvent> MessageHandler<E> for Gated {
    async fn handle(&self, _envelope: &MessageEnvelope<E>) -> Result<(), BusError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let mut release = self.release.subscribe();
        let _ = release.wait_for(|open| *open).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "Gated"
    }
}

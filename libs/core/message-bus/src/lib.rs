//! Message Bus
//!
//! Cross-module integration events over a pluggable transport.
//!
//! ## Features
//!
//! - **Typed API**: `publish`, `send` and `subscribe` over [`IntegrationEvent`] types
//! - **Event type registry**: every message type is declared once at startup
//! - **Topic strategies**: single topic with filters, one topic per module, or hybrid
//! - **Retry policy**: exponential backoff for transient failures only
//! - **Dead Letter Queue**: list, reprocess and purge failed messages
//! - **Transport selection**: RabbitMQ in development, Redis Streams in production,
//!   no-op in tests
//! - **Prometheus metrics** and an Axum admin router
//!
//! ## Example
//!
//! ```ignore
//! use message_bus::{Cancellation, EventTypeRegistry, MessageBusExt, MessagingProvider};
//!
//! #[derive(Serialize, Deserialize)]
//! struct ProviderApproved { provider_id: Uuid }
//!
//! impl IntegrationEvent for ProviderApproved {
//!     const EVENT_TYPE: &'static str = "ProviderApproved";
//!     const MODULE: &'static str = "Providers";
//! }
//!
//! let registry = EventTypeRegistry::builder().register::<ProviderApproved>().build()?;
//! let messaging = MessagingProvider::new(environment, config, registry).build().await?;
//!
//! messaging.bus.publish(ProviderApproved { provider_id }, None, &Cancellation::none()).await?;
//! ```

pub mod admin;
mod bus;
mod cancel;
mod config;
pub mod dlq;
mod envelope;
mod error;
mod factory;
pub mod metrics;
mod pipeline;
mod registry;
mod retry;
mod topic;
pub mod transport;

// Re-export main types
pub use self::metrics::init_metrics;
pub use admin::{AdminState, admin_router};
pub use bus::{
    MessageBus, MessageBusExt, MessageHandler, NoOpMessageBus, RawMessageHandler, Subscription,
    SubscriptionHandle, TransportMessageBus, TypedHandler,
};
pub use cancel::Cancellation;
pub use config::BusOptions;
pub use dlq::{
    DeadLetterService, DeadLetterStatistics, FailedMessageInfo, NoOpDeadLetterService,
    ReprocessOutcome, StoreDeadLetterService,
};
pub use envelope::{IntegrationEvent, MALFORMED_MESSAGE_TYPE, MessageEnvelope, RawEnvelope};
pub use error::{
    BusError, FailureKind, classify_amqp_error, classify_amqp_reply_code, classify_redis_error,
};
pub use factory::{
    DeadLetterKind, Messaging, MessagingProvider, TransportKind, select_dead_letter,
    select_transport,
};
pub use pipeline::{DeliveryOutcome, DeliveryPipeline, PUBLISHER_HANDLER};
pub use registry::{EventTypeRegistration, EventTypeRegistry, EventTypeRegistryBuilder};
pub use retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, RetryPolicy};
pub use topic::{TopicStrategy, TopicStrategySelector, kebab_case};

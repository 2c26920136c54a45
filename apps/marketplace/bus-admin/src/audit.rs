//! Audit trail of integration events
//!
//! One subscription per registered event type, each with its own dead letter
//! queue named `{service}-{event-type}`.

use crate::events::{
    DocumentUploaded, DocumentVerified, LocationAdded, ProviderApproved, ProviderSuspended,
    ReindexProvider, ServiceCatalogPublished, UserRegistered,
};
use async_trait::async_trait;
use message_bus::{
    BusError, Cancellation, IntegrationEvent, MessageBus, MessageBusExt, MessageEnvelope,
    MessageHandler, SubscriptionHandle,
};
use std::fmt::Debug;
use tracing::info;

/// Logs every event it receives
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditLog;

#[async_trait]
impl<E> MessageHandler<E> for AuditLog
where
    E: IntegrationEvent + Debug,
{
    async fn handle(&self, envelope: &MessageEnvelope<E>) -> Result<(), BusError> {
        info!(
            module = E::MODULE,
            message_type = %envelope.message_type(),
            message_id = %envelope.message_id(),
            correlation_id = %envelope.correlation_id(),
            attempt_count = envelope.attempt_count(),
            payload = ?envelope.payload(),
            "Integration event"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "AuditLog"
    }
}

/// Subscribe [`AuditLog`] to every marketplace event. Commands are consumed
/// from the default queue.
pub async fn subscribe_audit_log(
    bus: &dyn MessageBus,
    cancel: &Cancellation,
) -> Result<Vec<SubscriptionHandle>, BusError> {
    Ok(vec![
        bus.subscribe::<ProviderApproved, _>(AuditLog, None, cancel.clone()).await?,
        bus.subscribe::<ProviderSuspended, _>(AuditLog, None, cancel.clone()).await?,
        bus.subscribe::<DocumentUploaded, _>(AuditLog, None, cancel.clone()).await?,
        bus.subscribe::<DocumentVerified, _>(AuditLog, None, cancel.clone()).await?,
        bus.subscribe::<ServiceCatalogPublished, _>(AuditLog, None, cancel.clone()).await?,
        bus.subscribe::<LocationAdded, _>(AuditLog, None, cancel.clone()).await?,
        bus.subscribe::<UserRegistered, _>(AuditLog, None, cancel.clone()).await?,
        bus.subscribe_queue::<ReindexProvider, _>(AuditLog, None, cancel.clone()).await?,
    ])
}

//! Message handlers

use crate::envelope::{IntegrationEvent, MessageEnvelope, RawEnvelope};
use crate::error::BusError;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Typed handler for one integration event
///
/// # Example
///
/// ```rust,ignore
/// struct IndexProvider { index: SearchIndex }
///
/// #[async_trait]
/// impl MessageHandler<ProviderApproved> for IndexProvider {
///     async fn handle(
///         &self,
///         envelope: &MessageEnvelope<ProviderApproved>,
///     ) -> Result<(), BusError> {
///         self.index
///             .upsert(envelope.payload())
///             .await
///             .map_err(|e| BusError::transient(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler<E: IntegrationEvent>: Send + Sync + 'static {
    async fn handle(&self, envelope: &MessageEnvelope<E>) -> Result<(), BusError>;

    /// Recorded as the handler type on dead letters
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }
}

/// Handler over transport envelopes, what the bus runs
#[async_trait]
pub trait RawMessageHandler: Send + Sync {
    fn handler_type(&self) -> &str;

    async fn handle_raw(&self, envelope: &RawEnvelope) -> Result<(), BusError>;
}

/// Adapts a [`MessageHandler`] to a [`RawMessageHandler`]
pub struct TypedHandler<E, H> {
    handler: H,
    _event: PhantomData<fn() -> E>,
}

impl<E, H> TypedHandler<E, H>
where
    E: IntegrationEvent,
    H: MessageHandler<E>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<E, H> RawMessageHandler for TypedHandler<E, H>
where
    E: IntegrationEvent,
    H: MessageHandler<E>,
{
    fn handler_type(&self) -> &str {
        self.handler.name()
    }

    async fn handle_raw(&self, envelope: &RawEnvelope) -> Result<(), BusError> {
        // Undecodable payloads are permanent
        let typed = MessageEnvelope::<E>::from_raw(envelope)?;
        self.handler.handle(&typed).await
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize)]
    struct DocumentVerified {
        document_id: u64,
    }

    impl IntegrationEvent for DocumentVerified {
        const EVENT_TYPE: &'static str = "DocumentVerified";
        const MODULE: &'static str = "Documents";
    }

    #[derive(Default)]
    struct CountingHandler {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler<DocumentVerified> for CountingHandler {
        async fn handle(
            &self,
            envelope: &MessageEnvelope<DocumentVerified>,
        ) -> Result<(), BusError> {
            assert_eq!(envelope.payload().document_id, 42);
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_default_handler_name() {
        let handler = TypedHandler::<DocumentVerified, _>::new(CountingHandler::default());
        assert_eq!(handler.handler_type(), "CountingHandler");
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_payload() {
        let handler = TypedHandler::<DocumentVerified, _>::new(CountingHandler::default());
        let raw = MessageEnvelope::new(DocumentVerified { document_id: 42 })
            .to_raw()
            .unwrap();
        handler.handle_raw(&raw).await.unwrap();
        assert_eq!(handler.handler.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_typed_handler_bad_payload_is_permanent() {
        let handler = TypedHandler::<DocumentVerified, _>::new(CountingHandler::default());
        let raw = RawEnvelope::quarantined("{}".into(), "test");
        let err = handler.handle_raw(&raw).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(handler.handler.seen.load(Ordering::SeqCst), 0);
    }
}

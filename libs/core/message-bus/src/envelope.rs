//! Message envelopes
//!
//! `MessageEnvelope<T>` is what publishers build and handlers receive.
//! `RawEnvelope` is the transport form: same metadata, JSON payload.

use crate::error::BusError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message type given to bodies that could not be decoded
pub const MALFORMED_MESSAGE_TYPE: &str = "malformed";

/// Trait for integration events and commands carried by the bus.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct DocumentVerified { document_id: Uuid }
///
/// impl IntegrationEvent for DocumentVerified {
///     const EVENT_TYPE: &'static str = "DocumentVerified";
///     const MODULE: &'static str = "Documents";
/// }
/// ```
pub trait IntegrationEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical message type, unique across the registry
    const EVENT_TYPE: &'static str;

    /// Owning bounded context
    const MODULE: &'static str;

    /// Dedicated topic used by the hybrid strategy
    const DEDICATED_TOPIC: Option<&'static str> = None;
}

/// Typed envelope handed to publishers and handlers
#[derive(Debug, Clone)]
pub struct MessageEnvelope<T> {
    message_id: Uuid,
    message_type: String,
    correlation_id: Uuid,
    attempt_count: u32,
    sent_at: DateTime<Utc>,
    payload: T,
}

impl<T: IntegrationEvent> MessageEnvelope<T> {
    pub fn new(payload: T) -> Self {
        let message_id = Uuid::new_v4();
        Self {
            message_id,
            message_type: T::EVENT_TYPE.to_string(),
            correlation_id: message_id,
            attempt_count: 1,
            sent_at: Utc::now(),
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn to_raw(&self) -> Result<RawEnvelope, BusError> {
        Ok(RawEnvelope {
            message_id: self.message_id,
            message_type: self.message_type.clone(),
            correlation_id: self.correlation_id,
            attempt_count: self.attempt_count,
            sent_at: self.sent_at,
            first_failed_at: None,
            payload: serde_json::to_value(&self.payload)?,
            decode_error: None,
        })
    }

    pub fn from_raw(raw: &RawEnvelope) -> Result<Self, BusError> {
        if raw.message_type != T::EVENT_TYPE {
            return Err(BusError::UnknownMessageType(raw.message_type.clone()));
        }
        let payload = serde_json::from_value(raw.payload.clone())?;
        Ok(Self {
            message_id: raw.message_id,
            message_type: raw.message_type.clone(),
            correlation_id: raw.correlation_id,
            attempt_count: raw.attempt_count.max(1),
            sent_at: raw.sent_at,
            payload,
        })
    }
}

impl<T> MessageEnvelope<T> {
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// 1 on first delivery, incremented on every retry
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// Transport form of an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    message_id: Uuid,
    message_type: String,
    correlation_id: Uuid,
    attempt_count: u32,
    sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_failed_at: Option<DateTime<Utc>>,
    payload: serde_json::Value,
    #[serde(skip)]
    decode_error: Option<String>,
}

impl RawEnvelope {
    /// Decode a transport body. Never fails: an undecodable body becomes a
    /// quarantined envelope carrying the lossy text and the decode error.
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<RawEnvelope>(bytes) {
            Ok(mut envelope) => {
                envelope.attempt_count = envelope.attempt_count.max(1);
                envelope
            }
            Err(e) => Self::quarantined(String::from_utf8_lossy(bytes).into_owned(), e.to_string()),
        }
    }

    pub fn quarantined(body: String, reason: impl Into<String>) -> Self {
        let message_id = Uuid::new_v4();
        Self {
            message_id,
            message_type: MALFORMED_MESSAGE_TYPE.to_string(),
            correlation_id: message_id,
            attempt_count: 1,
            sent_at: Utc::now(),
            first_failed_at: None,
            payload: serde_json::Value::String(body),
            decode_error: Some(reason.into()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn encode_string(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn first_failed_at(&self) -> Option<DateTime<Utc>> {
        self.first_failed_at
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Why the body could not be decoded, for quarantined envelopes
    pub fn decode_error(&self) -> Option<&str> {
        self.decode_error.as_deref()
    }

    pub fn is_quarantined(&self) -> bool {
        self.decode_error.is_some()
    }

    /// Record a failed attempt. Only the first failure time is kept.
    pub fn mark_failed(&mut self, at: DateTime<Utc>) {
        self.first_failed_at.get_or_insert(at);
    }

    pub fn next_attempt(mut self) -> Self {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self
    }

    /// Reset for operator reprocessing: attempt 1, no failure history.
    pub fn reset_for_reprocess(mut self) -> Self {
        self.attempt_count = 1;
        self.first_failed_at = None;
        self
    }
}

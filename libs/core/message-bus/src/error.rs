//! Bus error types and failure classification
//!
//! Every failure that reaches the retry policy is classified as one of:
//! - **Transient**: likely to succeed on retry (broker unavailable, timeouts, throttling)
//! - **Permanent**: will never succeed without a code or data change, dead-letter immediately
//!
//! Cancellation is neither. It surfaces as [`BusError::Cancelled`] and is never
//! retried or dead-lettered.

use core_config::ConfigError;
use lapin::protocol::AMQPError;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use thiserror::Error;

/// Failure taxonomy used to gate retries
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Temporary failure, retry with exponential backoff
    Transient,
    /// Unrecoverable failure, move to the DLQ without retrying
    Permanent,
}

/// Message bus errors
#[derive(Error, Debug)]
pub enum BusError {
    /// Transport I/O failed (classified by the transport adapter)
    #[error("Transport error: {message}")]
    Transport { message: String, kind: FailureKind },

    /// A subscriber's handler failed
    #[error("Handler error: {message}")]
    Handler { message: String, kind: FailureKind },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The message type is not part of the event type registry
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Startup-time configuration problem
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// DLQ list/reprocess/purge failed
    #[error("Dead letter operation failed: {0}")]
    Operational(String),

    /// The caller's cancellation signal fired
    #[error("Operation cancelled")]
    Cancelled,

    /// A send gave up and its DLQ record could not be written either
    #[error("{error} (dead letter write failed: {dead_letter})")]
    NotDeadLettered {
        #[source]
        error: Box<BusError>,
        dead_letter: Box<BusError>,
    },
}

impl BusError {
    /// Create a transient handler error
    pub fn transient(message: impl Into<String>) -> Self {
        BusError::Handler {
            message: message.into(),
            kind: FailureKind::Transient,
        }
    }

    /// Create a permanent handler error
    pub fn permanent(message: impl Into<String>) -> Self {
        BusError::Handler {
            message: message.into(),
            kind: FailureKind::Permanent,
        }
    }

    /// Transport is unreachable or throttling
    pub fn unavailable(message: impl Into<String>) -> Self {
        BusError::Transport {
            message: message.into(),
            kind: FailureKind::Transient,
        }
    }

    pub fn operational(message: impl Into<String>) -> Self {
        BusError::Operational(message.into())
    }

    /// Classify this error for the retry policy.
    ///
    /// `Cancelled` reports `Permanent` so it can never be retried; callers
    /// check [`BusError::is_cancelled`] first so it is not dead-lettered either.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BusError::Transport { kind, .. } => *kind,
            BusError::Handler { kind, .. } => *kind,
            BusError::Serialization(_) => FailureKind::Permanent,
            BusError::UnknownMessageType(_) => FailureKind::Permanent,
            BusError::Config(_) => FailureKind::Permanent,
            BusError::Operational(_) => FailureKind::Transient,
            BusError::Cancelled => FailureKind::Permanent,
            BusError::NotDeadLettered { error, .. } => error.failure_kind(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BusError::Cancelled)
    }

    pub fn is_transient(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        BusError::Transport {
            kind: classify_redis_error(&err),
            message: err.to_string(),
        }
    }
}

impl From<lapin::Error> for BusError {
    fn from(err: lapin::Error) -> Self {
        BusError::Transport {
            kind: classify_amqp_error(&err),
            message: err.to_string(),
        }
    }
}

// Server replies that clear up on their own
const TRANSIENT_REDIS_CODES: [&str; 6] = [
    "TRYAGAIN",
    "LOADING",
    "BUSY ",
    "MASTERDOWN",
    "CLUSTERDOWN",
    "READONLY",
];

/// Classification for Redis Streams transport failures
pub fn classify_redis_error(err: &redis::RedisError) -> FailureKind {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        return FailureKind::Transient;
    }

    let text = err.to_string();
    if TRANSIENT_REDIS_CODES.iter().any(|code| text.contains(code)) {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

// Connection-level failures lapin reports without an io source
const TRANSIENT_AMQP_MARKERS: [&str; 5] = [
    "io error",
    "invalid connection state",
    "not connected",
    "timed out",
    "heartbeat",
];

// Broker replies that clear up on their own: CONNECTION_FORCED, NO_CONSUMERS,
// RESOURCE_LOCKED, RESOURCE_ERROR
const TRANSIENT_AMQP_REPLY_CODES: [u16; 4] = [320, 313, 405, 506];

/// Classification for RabbitMQ transport failures.
///
/// Broker replies (channel or connection close) are classified by their AMQP
/// reply code, so a `PRECONDITION_FAILED` close is permanent.
pub fn classify_amqp_error(err: &lapin::Error) -> FailureKind {
    if has_io_source(err) {
        return FailureKind::Transient;
    }
    if let Some(code) = amqp_reply_code(err) {
        return classify_amqp_reply_code(code);
    }

    let text = err.to_string().to_ascii_lowercase();
    if TRANSIENT_AMQP_MARKERS.iter().any(|marker| text.contains(marker)) {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

pub fn classify_amqp_reply_code(code: u16) -> FailureKind {
    if TRANSIENT_AMQP_REPLY_CODES.contains(&code) {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

fn amqp_reply_code(err: &(dyn StdError + 'static)) -> Option<u16> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(amqp) = e.downcast_ref::<AMQPError>() {
            return Some(amqp.get_id());
        }
        current = e.source();
    }
    None
}

fn has_io_source(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<std::io::Error>() {
            return true;
        }
        current = e.source();
    }
    false
}

//! Bus runtime options
//!
//! This module provides `BusOptions`, the subset of messaging configuration
//! the bus and its transports need at runtime.

use core_config::messaging::MessagingConfig;
use uuid::Uuid;

/// Options for the message bus and transports
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Logical service name, prefix for default subscription names
    pub service_name: String,

    /// Queue used by `send` when no destination is given
    pub default_queue: String,

    /// Handler executions allowed in flight per subscription
    pub max_concurrent_calls: usize,

    /// Unique consumer ID (auto-generated if not provided)
    pub consumer_id: String,

    /// Approximate stream length before trimming (Redis Streams)
    pub stream_max_length: usize,

    /// Blocking read timeout in milliseconds (Redis Streams)
    pub block_timeout_ms: u64,

    /// Idle time after which another consumer's pending entries are claimed
    /// (Redis Streams). Must exceed the longest handler run including backoff.
    pub claim_idle_ms: u64,
}

impl BusOptions {
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        Self {
            consumer_id: format!("{}-{}", service_name, Uuid::new_v4()),
            service_name,
            default_queue: "app-commands".to_string(),
            max_concurrent_calls: 10,
            stream_max_length: 100_000,
            block_timeout_ms: 1000,
            claim_idle_ms: 300_000,
        }
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(config.service_name.clone())
            .with_default_queue(config.default_queue.clone())
            .with_max_concurrent_calls(config.max_concurrent_calls)
            .with_block_timeout_ms(config.block_timeout_ms)
            .with_claim_idle_ms(config.claim_idle_ms)
    }

    /// Set the default queue for `send`
    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    /// Set the per-subscription concurrency (minimum 1)
    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max.max(1);
        self
    }

    /// Set the consumer ID
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Set the maximum stream length
    pub fn with_stream_max_length(mut self, max_length: usize) -> Self {
        self.stream_max_length = max_length;
        self
    }

    /// Set the blocking read timeout
    pub fn with_block_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.block_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle time before abandoned entries are claimed
    pub fn with_claim_idle_ms(mut self, idle_ms: u64) -> Self {
        self.claim_idle_ms = idle_ms;
        self
    }
}

impl Default for BusOptions {
    fn default() -> Self {
        Self::new("app")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = BusOptions::new("catalogs")
            .with_default_queue("catalog-commands")
            .with_max_concurrent_calls(0)
            .with_consumer_id("catalogs-1");

        assert_eq!(options.default_queue, "catalog-commands");
        assert_eq!(options.max_concurrent_calls, 1);
        assert_eq!(options.consumer_id, "catalogs-1");
    }

    #[test]
    fn test_from_config() {
        let config = MessagingConfig {
            service_name: "search".into(),
            max_concurrent_calls: 4,
            ..Default::default()
        };
        let options = BusOptions::from_config(&config);
        assert_eq!(options.service_name, "search");
        assert_eq!(options.default_queue, "app-commands");
        assert_eq!(options.max_concurrent_calls, 4);
        assert_eq!(options.claim_idle_ms, 300_000);
        assert!(options.consumer_id.starts_with("search-"));
    }
}

//! Shared test utilities for messaging tests
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: Deterministic ids and queue/topic names (always available)
//! - `assertions`: Custom assertion helpers (always available)
//!
//! # Features
//!
//! - `redis`: Enables Redis test infrastructure
//!
//! # Usage
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! async fn my_stream_test() {
//!     let redis = TestRedis::new().await;
//!     let data = TestDataBuilder::from_test_name("my_stream_test");
//!
//!     let topic = data.topic("events");
//!     assert_eq!(redis.stream_len(&topic).await, 0);
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// Tests sharing a broker stay isolated by deriving their queue and topic
/// names from the test name.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_reprocess");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic id, distinct per `index`
    pub fn id(&self, index: u64) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.seed.to_le_bytes());
        bytes[8..].copy_from_slice(&index.to_le_bytes());
        Uuid::from_bytes(bytes)
    }

    /// Deterministic correlation id
    pub fn correlation_id(&self) -> Uuid {
        self.id(u64::MAX)
    }

    /// Queue name unique to this test
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.queue("commands"), "test-7-commands");
    /// ```
    pub fn queue(&self, name: &str) -> String {
        format!("test-{}-{}", self.seed, name)
    }

    /// Topic name unique to this test
    pub fn topic(&self, name: &str) -> String {
        format!("test-{}-{}", self.seed, name)
    }

    /// Subscription name unique to this test
    pub fn subscription(&self, name: &str) -> String {
        format!("test-{}-sub-{}", self.seed, name)
    }
}

/// Test assertion helpers
pub mod assertions {
    use std::future::Future;
    use std::time::Duration;

    /// Poll `check` until it returns true or `timeout` elapses
    pub async fn eventually<F, Fut>(timeout: Duration, context: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check().await {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("{}: condition not met within {:?}", context, timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// [`eventually`] for checks that need no await
    pub async fn wait_until<F>(timeout: Duration, context: &str, mut check: F)
    where
        F: FnMut() -> bool,
    {
        eventually(timeout, context, || std::future::ready(check())).await
    }

    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.id(1), builder2.id(1));
        assert_ne!(builder1.id(1), builder1.id(2));
        assert_eq!(builder1.queue("commands"), builder2.queue("commands"));
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        // Different test names should generate different data
        assert_ne!(builder1.topic("events"), builder2.topic("events"));
        assert_ne!(builder1.correlation_id(), builder2.correlation_id());
    }

    #[tokio::test]
    async fn test_eventually() {
        let mut calls = 0;
        assertions::eventually(Duration::from_secs(1), "counter", || {
            calls += 1;
            let done = calls >= 3;
            async move { done }
        })
        .await;
        assert_eq!(calls, 3);
    }
}

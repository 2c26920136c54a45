//! Prometheus metrics for the message bus
//!
//! Provides observability into publishing, handler executions, retries and
//! the dead letter queue.

use crate::error::FailureKind;
use crate::transport::Destination;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. If another
/// recorder is already installed the bus keeps running without an exporter.
pub fn init_metrics() {
    let result = PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, metrics_exporter_prometheus::BuildError>(handle)
    });
    if let Err(e) = result {
        warn!(error = %e, "Failed to install Prometheus recorder, metrics disabled");
    }
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

fn destination_kind(destination: &Destination) -> &'static str {
    if destination.is_topic() { "topic" } else { "queue" }
}

/// Record an outbound send or publish
pub fn record_outbound(destination: &Destination, message_type: &str, status: &'static str) {
    counter!(
        "message_bus_outbound_total",
        "kind" => destination_kind(destination),
        "destination" => destination.name().to_string(),
        "message_type" => message_type.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a message moved to a dead letter queue
pub fn record_dead_lettered(queue: &str, message_type: &str, kind: FailureKind) {
    counter!(
        "message_bus_dead_lettered_total",
        "queue" => queue.to_string(),
        "message_type" => message_type.to_string(),
        "failure_kind" => kind.as_ref().to_string()
    )
    .increment(1);
}

/// Record an operator reprocess request
pub fn record_reprocessed(queue: &str, outcome: &'static str) {
    counter!(
        "message_bus_dlq_reprocessed_total",
        "queue" => queue.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record an operator purge
pub fn record_purged(queue: &str) {
    counter!("message_bus_dlq_purged_total", "queue" => queue.to_string()).increment(1);
}

/// Per-subscription handler metrics
#[derive(Clone)]
pub struct HandlerMetrics {
    subscription: String,
    message_type: String,
}

impl HandlerMetrics {
    pub fn new(subscription: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            message_type: message_type.into(),
        }
    }

    /// Record a message being received
    pub fn received(&self) {
        counter!(
            "message_bus_messages_received_total",
            "subscription" => self.subscription.clone(),
            "message_type" => self.message_type.clone()
        )
        .increment(1);
    }

    /// Record a handler execution with its outcome
    pub fn handled(&self, status: &'static str, duration: Duration) {
        counter!(
            "message_bus_messages_handled_total",
            "subscription" => self.subscription.clone(),
            "message_type" => self.message_type.clone(),
            "status" => status
        )
        .increment(1);

        histogram!(
            "message_bus_handler_duration_seconds",
            "subscription" => self.subscription.clone(),
            "message_type" => self.message_type.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a retry being scheduled
    pub fn retried(&self, attempt_count: u32) {
        counter!(
            "message_bus_retries_total",
            "subscription" => self.subscription.clone(),
            "message_type" => self.message_type.clone(),
            "attempt" => attempt_count.to_string()
        )
        .increment(1);
    }
}

//! Health and DLQ admin HTTP handlers.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Bus topology (`/bus/info`)
//! - Prometheus metrics (`/metrics`)
//! - DLQ admin endpoints (`/admin/dlq/*`)

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::dlq::{DeadLetterService, ReprocessOutcome};
use crate::metrics;

/// Shared state for admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    /// DLQ operations.
    pub dead_letters: Arc<dyn DeadLetterService>,
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    /// Active transport name.
    pub transport: String,
    /// Physical topics the bus publishes to.
    pub topics: Vec<String>,
}

impl AdminState {
    pub fn new(
        dead_letters: Arc<dyn DeadLetterService>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        transport: impl Into<String>,
    ) -> Self {
        Self {
            dead_letters,
            app_name: app_name.into(),
            app_version: app_version.into(),
            transport: transport.into(),
            topics: Vec::new(),
        }
    }

    pub fn with_topics(mut self, topics: impl IntoIterator<Item = String>) -> Self {
        self.topics = topics.into_iter().collect();
        self
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: String,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Active transport.
    pub transport: String,
}

type ApiError = (StatusCode, Json<Value>);

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

fn parse_message_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Invalid message id",
                "message_id": raw
            })),
        )
    })
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
        transport: state.transport,
    })
}

/// Bus topology handler.
///
/// `GET /bus/info`
pub async fn bus_info_handler(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({
        "transport": state.transport,
        "dead_letter_service": state.dead_letters.name(),
        "topics": state.topics,
        "retry_policy": {
            "max_attempts": state.dead_letters.retry_policy().max_attempts(),
            "base_delay_seconds": state.dead_letters.retry_policy().base_delay().as_secs_f64(),
            "max_delay_seconds": state.dead_letters.retry_policy().max_delay().as_secs_f64(),
        }
    }))
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

// ============================================================================
// DLQ Admin Handlers
// ============================================================================

/// Query parameters for DLQ list endpoint.
#[derive(Debug, Deserialize)]
pub struct DlqListParams {
    /// Maximum number of messages to return (default: 10, max: 100)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// DLQ statistics across every queue.
///
/// `GET /admin/dlq/stats`
pub async fn dlq_stats_handler(
    State(state): State<AdminState>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .dead_letters
        .get_dead_letter_statistics()
        .await
        .map(Json)
        .map_err(internal_error)
}

/// List messages in one dead letter queue, oldest first.
///
/// `GET /admin/dlq/{queue}/messages?limit=10`
pub async fn dlq_list_handler(
    State(state): State<AdminState>,
    Path(queue): Path<String>,
    Query(params): Query<DlqListParams>,
) -> Result<impl IntoResponse, ApiError> {
    // Cap limit at 100
    let limit = params.limit.min(100);

    let messages = state
        .dead_letters
        .list_dead_letter_messages(&queue, limit)
        .await
        .map_err(internal_error)?;

    Ok(Json(json!({
        "queue": queue,
        "limit": limit,
        "count": messages.len(),
        "messages": messages,
    })))
}

/// Reprocess a single message.
///
/// Ids that are no longer in the DLQ report `"requeued": false`, so retrying
/// the request is safe.
///
/// `POST /admin/dlq/{queue}/reprocess/{message_id}`
pub async fn dlq_reprocess_handler(
    State(state): State<AdminState>,
    Path((queue, message_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_message_id(&message_id)?;

    let outcome = state
        .dead_letters
        .reprocess_dead_letter_message(&queue, id)
        .await
        .map_err(internal_error)?;

    let requeued = outcome == ReprocessOutcome::Requeued;
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "queue": queue,
            "message_id": id,
            "requeued": requeued,
            "outcome": outcome,
            "message": if requeued {
                "Message requeued for processing"
            } else {
                "Message not in DLQ (already reprocessed or purged)"
            }
        })),
    ))
}

/// Purge a single message without reprocessing.
///
/// `DELETE /admin/dlq/{queue}/{message_id}`
pub async fn dlq_purge_handler(
    State(state): State<AdminState>,
    Path((queue, message_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_message_id(&message_id)?;

    match state.dead_letters.purge_dead_letter_message(&queue, id).await {
        Ok(true) => Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "queue": queue,
                "message_id": id,
                "message": "Message purged from DLQ"
            })),
        )),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Message not found in DLQ",
                "queue": queue,
                "message_id": id
            })),
        )),
        Err(e) => Err(internal_error(e)),
    }
}

/// Create a full router with health and DLQ admin endpoints.
///
/// - `/health`, `/healthz` - Liveness probe
/// - `/bus/info` - Transport, topics and retry policy
/// - `/metrics` - Prometheus metrics
/// - `GET /admin/dlq/stats` - DLQ statistics
/// - `GET /admin/dlq/{queue}/messages` - List DLQ messages
/// - `POST /admin/dlq/{queue}/reprocess/{message_id}` - Reprocess one message
/// - `DELETE /admin/dlq/{queue}/{message_id}` - Purge one message
pub fn admin_router(state: AdminState) -> axum::Router {
    use axum::routing::{delete, get, post};

    axum::Router::new()
        // Health endpoints
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/bus/info", get(bus_info_handler))
        .route("/metrics", get(metrics_handler))
        // DLQ admin endpoints
        .route("/admin/dlq/stats", get(dlq_stats_handler))
        .route("/admin/dlq/{queue}/messages", get(dlq_list_handler))
        .route(
            "/admin/dlq/{queue}/reprocess/{message_id}",
            post(dlq_reprocess_handler),
        )
        .route("/admin/dlq/{queue}/{message_id}", delete(dlq_purge_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::tests::failed;
    use crate::dlq::{DeadLetterStore, InMemoryDeadLetterStore, StoreDeadLetterService};
    use crate::error::BusError;
    use crate::retry::RetryPolicy;
    use crate::transport::MockTransport;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn state_with(
        records: &[crate::dlq::FailedMessageInfo],
        transport: MockTransport,
    ) -> AdminState {
        let store = Arc::new(InMemoryDeadLetterStore::default());
        for record in records {
            store.append(record).await.unwrap();
        }
        let service = StoreDeadLetterService::new(store, RetryPolicy::default())
            .with_transport(Arc::new(transport));
        AdminState::new(Arc::new(service), "bus-admin", "0.1.0", "in-memory")
            .with_topics(["app-events".to_string()])
    }

    async fn call(state: AdminState, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = admin_router(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let state = state_with(&[], MockTransport::new()).await;
        let (status, body) = call(state, "GET", "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["transport"], "in-memory");
    }

    #[tokio::test]
    async fn test_bus_info() {
        let state = state_with(&[], MockTransport::new()).await;
        let (status, body) = call(state, "GET", "/bus/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["topics"][0], "app-events");
        assert_eq!(body["retry_policy"]["max_attempts"], 3);
    }

    #[tokio::test]
    async fn test_stats_and_list() {
        let records = vec![
            failed("search-indexer", "ProviderApproved"),
            failed("search-indexer", "DocumentVerified"),
        ];
        let state = state_with(&records, MockTransport::new()).await;

        let (status, body) = call(state.clone(), "GET", "/admin/dlq/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_dead_lettered"], 2);
        assert_eq!(body["by_queue"]["search-indexer"], 2);

        let (status, body) = call(state, "GET", "/admin/dlq/search-indexer/messages?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["messages"][0]["message_id"], records[0].message_id.to_string());
    }

    #[tokio::test]
    async fn test_reprocess_twice() {
        let record = failed("search-indexer", "ProviderApproved");
        let mut transport = MockTransport::new();
        transport.expect_redeliver().times(1).returning(|_, _| Ok(()));
        let state = state_with(std::slice::from_ref(&record), transport).await;
        let uri = format!("/admin/dlq/search-indexer/reprocess/{}", record.message_id);

        let (status, body) = call(state.clone(), "POST", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requeued"], true);

        let (status, body) = call(state, "POST", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requeued"], false);
    }

    #[tokio::test]
    async fn test_reprocess_failure_is_500() {
        let record = failed("q", "ProviderApproved");
        let mut transport = MockTransport::new();
        transport
            .expect_redeliver()
            .returning(|_, _| Err(BusError::unavailable("broker down")));
        let state = state_with(std::slice::from_ref(&record), transport).await;

        let uri = format!("/admin/dlq/q/reprocess/{}", record.message_id);
        let (status, body) = call(state, "POST", &uri).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("broker down"));
    }

    #[tokio::test]
    async fn test_purge() {
        let record = failed("q", "ProviderApproved");
        let state = state_with(std::slice::from_ref(&record), MockTransport::new()).await;
        let uri = format!("/admin/dlq/q/{}", record.message_id);

        let (status, _) = call(state.clone(), "DELETE", &uri).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(state, "DELETE", &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Message not found in DLQ");
    }

    #[tokio::test]
    async fn test_malformed_id_is_400() {
        let state = state_with(&[], MockTransport::new()).await;
        let (status, _) = call(state, "POST", "/admin/dlq/q/reprocess/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            name: "bus-admin".to_string(),
            version: "1.0.0".to_string(),
            transport: "redis-streams".to_string(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"transport\":\"redis-streams\""));
    }
}

//! Marketplace Bus Admin
//!
//! Operator service for the marketplace event bus.
//!
//! ## Architecture
//!
//! ```text
//! Providers / Documents / ServiceCatalogs / Locations / Search / Users
//!   ↓ (publish / send)
//! MessageBus (RabbitMQ in dev, Redis Streams in prod, no-op in tests)
//!   ↓ (one subscription per event type)
//! AuditLog handlers
//!
//! Admin HTTP server
//!   /health, /bus/info, /metrics, /admin/dlq/*
//! ```
//!
//! ## Features
//!
//! - Transport selected once at startup from `APP_ENV` and `MESSAGING_RABBITMQ_ENABLED`
//! - Audit trail of every integration event crossing module boundaries
//! - Dead letter list, reprocess and purge over HTTP
//! - Graceful shutdown on SIGINT/SIGTERM

pub mod audit;
pub mod events;

use audit::subscribe_audit_log;
use core_config::server::AdminServerConfig;
use core_config::{Environment, FromEnv, app_info, messaging::MessagingConfig};
use eyre::{Result, WrapErr};
use message_bus::{AdminState, Cancellation, MessagingProvider, admin_router};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};

/// Start the health and admin HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Bus information: `/bus/info`
/// - Prometheus metrics: `/metrics`
/// - DLQ admin: `/admin/dlq/*`
async fn start_admin_server(
    state: AdminState,
    config: AdminServerConfig,
    shutdown: Cancellation,
) -> Result<()> {
    let app = admin_router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr = config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind admin server to {}", addr))?;

    info!(address = %addr, "Admin server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .wrap_err("Admin server failed")?;

    Ok(())
}

/// Run the bus admin service
///
/// 1. Sets up error reporting and structured logging
/// 2. Loads messaging and admin server configuration
/// 3. Builds the messaging stack for the current environment
/// 4. Subscribes the audit log to every registered event type
/// 5. Serves the admin API until a shutdown signal arrives
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid or a required connection string is missing
/// - The production transport cannot be reached
/// - The admin server cannot bind
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    message_bus::init_metrics();

    let app_info = app_info!();
    info!(
        name = %app_info.name,
        version = %app_info.version,
        environment = %environment,
        "Starting bus admin service"
    );

    let messaging_config =
        MessagingConfig::from_env().wrap_err("Failed to load messaging configuration")?;
    let server_config =
        AdminServerConfig::from_env().wrap_err("Failed to load admin server configuration")?;

    let registry = events::marketplace_registry().wrap_err("Invalid event type registry")?;
    let messaging = MessagingProvider::new(environment, messaging_config, registry)
        .build()
        .await
        .wrap_err("Failed to build messaging stack")?;
    info!(
        transport = %messaging.transport,
        dead_letters = %messaging.dead_letter_kind,
        "Messaging ready"
    );

    // Set up a shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = Cancellation::from(shutdown_rx);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let subscriptions = subscribe_audit_log(messaging.bus.as_ref(), &shutdown)
        .await
        .wrap_err("Failed to subscribe audit log")?;
    info!(count = subscriptions.len(), "Audit subscriptions running");

    let state = AdminState::new(
        messaging.dead_letters.clone(),
        app_info.name,
        app_info.version,
        messaging.transport.to_string(),
    )
    .with_topics(messaging.topics.topics());

    let server = start_admin_server(state, server_config, shutdown.clone()).await;

    info!("Stopping subscriptions...");
    for handle in subscriptions {
        handle.shutdown().await;
    }

    server?;
    info!("Bus admin service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install signal handler")?;
        sigterm.recv().await;
        Ok::<_, eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

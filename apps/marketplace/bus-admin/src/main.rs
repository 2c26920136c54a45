//! Marketplace Bus Admin - Entry Point
//!
//! Audits marketplace integration events and serves the dead letter admin API.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    marketplace_bus_admin::run().await
}

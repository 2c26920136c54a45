//! Marketplace integration events
//!
//! Each module declares the events it publishes to the others. Payloads are
//! ids plus the few fields subscribers need without calling back.

use message_bus::{EventTypeRegistry, IntegrationEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderApproved {
    pub provider_id: Uuid,
    pub approved_by: Uuid,
}

impl IntegrationEvent for ProviderApproved {
    const EVENT_TYPE: &'static str = "ProviderApproved";
    const MODULE: &'static str = "Providers";
    const DEDICATED_TOPIC: Option<&'static str> = Some("provider-approvals");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSuspended {
    pub provider_id: Uuid,
    pub reason: String,
}

impl IntegrationEvent for ProviderSuspended {
    const EVENT_TYPE: &'static str = "ProviderSuspended";
    const MODULE: &'static str = "Providers";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUploaded {
    pub document_id: Uuid,
    pub provider_id: Uuid,
    pub content_type: String,
}

impl IntegrationEvent for DocumentUploaded {
    const EVENT_TYPE: &'static str = "DocumentUploaded";
    const MODULE: &'static str = "Documents";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVerified {
    pub document_id: Uuid,
    pub provider_id: Uuid,
}

impl IntegrationEvent for DocumentVerified {
    const EVENT_TYPE: &'static str = "DocumentVerified";
    const MODULE: &'static str = "Documents";
    const DEDICATED_TOPIC: Option<&'static str> = Some("document-verifications");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCatalogPublished {
    pub catalog_id: Uuid,
    pub provider_id: Uuid,
}

impl IntegrationEvent for ServiceCatalogPublished {
    const EVENT_TYPE: &'static str = "ServiceCatalogPublished";
    const MODULE: &'static str = "ServiceCatalogs";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationAdded {
    pub location_id: Uuid,
    pub provider_id: Uuid,
    pub city: String,
}

impl IntegrationEvent for LocationAdded {
    const EVENT_TYPE: &'static str = "LocationAdded";
    const MODULE: &'static str = "Locations";
}

/// Command sent to the search module's queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexProvider {
    pub provider_id: Uuid,
}

impl IntegrationEvent for ReindexProvider {
    const EVENT_TYPE: &'static str = "ReindexProvider";
    const MODULE: &'static str = "Search";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegistered {
    pub user_id: Uuid,
    pub email: String,
}

impl IntegrationEvent for UserRegistered {
    const EVENT_TYPE: &'static str = "UserRegistered";
    const MODULE: &'static str = "Users";
}

/// Every event type the marketplace publishes
pub fn marketplace_registry() -> Result<EventTypeRegistry, core_config::ConfigError> {
    EventTypeRegistry::builder()
        .register::<ProviderApproved>()
        .register::<ProviderSuspended>()
        .register::<DocumentUploaded>()
        .register::<DocumentVerified>()
        .register::<ServiceCatalogPublished>()
        .register::<LocationAdded>()
        .register::<ReindexProvider>()
        .register::<UserRegistered>()
        .build()
}

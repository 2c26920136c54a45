//! Event type registry
//!
//! Built once at startup from every integration event the process knows
//! about, then shared read-only behind an `Arc`.

use crate::envelope::IntegrationEvent;
use core_config::ConfigError;
use serde::Serialize;
use std::collections::BTreeMap;

/// One registered event type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventTypeRegistration {
    pub event_type: String,
    pub module: String,
    pub dedicated_topic: Option<String>,
}

impl EventTypeRegistration {
    pub fn new(event_type: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            module: module.into(),
            dedicated_topic: None,
        }
    }

    pub fn of<E: IntegrationEvent>() -> Self {
        Self {
            event_type: E::EVENT_TYPE.to_string(),
            module: E::MODULE.to_string(),
            dedicated_topic: E::DEDICATED_TOPIC.map(str::to_string),
        }
    }

    pub fn with_dedicated_topic(mut self, topic: impl Into<String>) -> Self {
        self.dedicated_topic = Some(topic.into());
        self
    }
}

/// Append-only builder, consumed by [`EventTypeRegistryBuilder::build`]
#[derive(Debug, Default)]
pub struct EventTypeRegistryBuilder {
    registrations: Vec<EventTypeRegistration>,
}

impl EventTypeRegistryBuilder {
    pub fn register<E: IntegrationEvent>(self) -> Self {
        self.register_raw(EventTypeRegistration::of::<E>())
    }

    pub fn register_raw(mut self, registration: EventTypeRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Rejects blank names and conflicting registrations of the same type.
    /// Registering the exact same type twice is allowed.
    pub fn build(self) -> Result<EventTypeRegistry, ConfigError> {
        let mut by_type: BTreeMap<String, EventTypeRegistration> = BTreeMap::new();

        for registration in self.registrations {
            if registration.event_type.trim().is_empty() {
                return Err(ConfigError::Invalid("event type name must not be empty".into()));
            }
            if registration.module.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "event type '{}' has an empty module name",
                    registration.event_type
                )));
            }
            if registration
                .dedicated_topic
                .as_deref()
                .is_some_and(|topic| topic.trim().is_empty())
            {
                return Err(ConfigError::Invalid(format!(
                    "event type '{}' has an empty dedicated topic",
                    registration.event_type
                )));
            }

            match by_type.get(&registration.event_type) {
                Some(existing) if existing == &registration => {}
                Some(existing) => {
                    return Err(ConfigError::Invalid(format!(
                        "event type '{}' registered twice with different settings ({:?} vs {:?})",
                        registration.event_type, existing, registration
                    )));
                }
                None => {
                    by_type.insert(registration.event_type.clone(), registration);
                }
            }
        }

        Ok(EventTypeRegistry { by_type })
    }
}

/// Immutable set of known event types
#[derive(Debug, Clone, Default)]
pub struct EventTypeRegistry {
    by_type: BTreeMap<String, EventTypeRegistration>,
}

impl EventTypeRegistry {
    pub fn builder() -> EventTypeRegistryBuilder {
        EventTypeRegistryBuilder::default()
    }

    pub fn get(&self, event_type: &str) -> Option<&EventTypeRegistration> {
        self.by_type.get(event_type)
    }

    /// Look up a type, failing with a configuration error when it is unknown
    pub fn require(&self, event_type: &str) -> Result<&EventTypeRegistration, ConfigError> {
        self.get(event_type)
            .ok_or_else(|| ConfigError::UnregisteredEventType(event_type.to_string()))
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.by_type.contains_key(event_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventTypeRegistration> {
        self.by_type.values()
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct DocumentUploaded;

    impl IntegrationEvent for DocumentUploaded {
        const EVENT_TYPE: &'static str = "DocumentUploaded";
        const MODULE: &'static str = "Documents";
    }

    #[derive(Serialize, Deserialize)]
    struct PaymentCaptured;

    impl IntegrationEvent for PaymentCaptured {
        const EVENT_TYPE: &'static str = "PaymentCaptured";
        const MODULE: &'static str = "Payments";
        const DEDICATED_TOPIC: Option<&'static str> = Some("payments-critical");
    }

    #[test]
    fn test_register_typed_events() {
        let registry = EventTypeRegistry::builder()
            .register::<DocumentUploaded>()
            .register::<PaymentCaptured>()
            .build()
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("DocumentUploaded").unwrap().module, "Documents");
        assert_eq!(
            registry.get("PaymentCaptured").unwrap().dedicated_topic.as_deref(),
            Some("payments-critical")
        );
        assert_eq!(
            registry.event_types().collect::<Vec<_>>(),
            vec!["DocumentUploaded", "PaymentCaptured"]
        );
    }

    #[test]
    fn test_identical_duplicate_is_idempotent() {
        let registry = EventTypeRegistry::builder()
            .register::<DocumentUploaded>()
            .register::<DocumentUploaded>()
            .build()
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conflicting_duplicate_is_rejected() {
        let err = EventTypeRegistry::builder()
            .register::<DocumentUploaded>()
            .register_raw(EventTypeRegistration::new("DocumentUploaded", "Catalogs"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_blank_names_are_rejected() {
        assert!(
            EventTypeRegistry::builder()
                .register_raw(EventTypeRegistration::new(" ", "Documents"))
                .build()
                .is_err()
        );
        assert!(
            EventTypeRegistry::builder()
                .register_raw(EventTypeRegistration::new("Thing", ""))
                .build()
                .is_err()
        );
        assert!(
            EventTypeRegistry::builder()
                .register_raw(
                    EventTypeRegistration::new("Thing", "Things").with_dedicated_topic("")
                )
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_require_unknown_type() {
        let registry = EventTypeRegistry::default();
        let err = registry.require("Nope").unwrap_err();
        assert!(matches!(err, ConfigError::UnregisteredEventType(t) if t == "Nope"));
        assert!(registry.is_empty());
    }
}

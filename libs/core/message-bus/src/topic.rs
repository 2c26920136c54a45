//! Topic strategy selection
//!
//! Exactly one strategy is active per deployment:
//! - **SingleWithFilters**: every event goes to one topic, consumers filter by type
//! - **MultipleByDomain**: one topic per owning module (`ServiceCatalogs` -> `service-catalogs`)
//! - **Hybrid**: an allow-list of event types get dedicated topics, the rest use the default

use crate::envelope::IntegrationEvent;
use crate::registry::EventTypeRegistry;
use core_config::ConfigError;
use core_config::messaging::{MessagingConfig, TopicStrategyKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Active topic strategy and its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicStrategy {
    SingleWithFilters {
        default_topic: String,
    },
    MultipleByDomain,
    Hybrid {
        default_topic: String,
        /// Event type -> dedicated topic. Overrides the type's own hint.
        dedicated_topics: BTreeMap<String, String>,
    },
}

impl TopicStrategy {
    pub fn single(default_topic: impl Into<String>) -> Self {
        TopicStrategy::SingleWithFilters {
            default_topic: default_topic.into(),
        }
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        match config.topic_strategy {
            TopicStrategyKind::SingleWithFilters => Self::single(config.default_topic.clone()),
            TopicStrategyKind::MultipleByDomain => TopicStrategy::MultipleByDomain,
            TopicStrategyKind::Hybrid => TopicStrategy::Hybrid {
                default_topic: config.default_topic.clone(),
                dedicated_topics: config.dedicated_topics.iter().cloned().collect(),
            },
        }
    }

    pub fn kind(&self) -> TopicStrategyKind {
        match self {
            TopicStrategy::SingleWithFilters { .. } => TopicStrategyKind::SingleWithFilters,
            TopicStrategy::MultipleByDomain => TopicStrategyKind::MultipleByDomain,
            TopicStrategy::Hybrid { .. } => TopicStrategyKind::Hybrid,
        }
    }

    fn default_topic(&self) -> Option<&str> {
        match self {
            TopicStrategy::SingleWithFilters { default_topic }
            | TopicStrategy::Hybrid { default_topic, .. } => Some(default_topic),
            TopicStrategy::MultipleByDomain => None,
        }
    }
}

/// Resolves the physical topic for every registered event type
#[derive(Debug, Clone)]
pub struct TopicStrategySelector {
    strategy: TopicStrategy,
    registry: Arc<EventTypeRegistry>,
}

impl TopicStrategySelector {
    /// Validates the whole registry up front so misconfiguration fails at startup.
    pub fn new(
        strategy: TopicStrategy,
        registry: Arc<EventTypeRegistry>,
    ) -> Result<Self, ConfigError> {
        if let Some(default_topic) = strategy.default_topic()
            && default_topic.trim().is_empty()
        {
            return Err(ConfigError::Invalid("default topic must not be empty".into()));
        }

        if let TopicStrategy::Hybrid {
            dedicated_topics, ..
        } = &strategy
        {
            for (event_type, topic) in dedicated_topics {
                if !registry.contains(event_type) {
                    return Err(ConfigError::Invalid(format!(
                        "dedicated topic '{topic}' names unregistered event type '{event_type}'"
                    )));
                }
                if topic.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "dedicated topic for '{event_type}' must not be empty"
                    )));
                }
            }
        }

        let selector = Self { strategy, registry };
        // Distinct modules must not collapse onto one topic
        let mut owners: BTreeMap<String, &str> = BTreeMap::new();
        for event_type in selector.registry.event_types() {
            let topic = selector.select_topic_for_event(event_type)?;
            if selector.strategy == TopicStrategy::MultipleByDomain {
                let module = selector.registry.require(event_type)?.module.as_str();
                if let Some(other) = owners.insert(topic.clone(), module)
                    && other != module
                {
                    return Err(ConfigError::Invalid(format!(
                        "modules '{other}' and '{module}' both map to topic '{topic}'"
                    )));
                }
            }
        }
        Ok(selector)
    }

    pub fn strategy(&self) -> &TopicStrategy {
        &self.strategy
    }

    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    /// Physical topic for a registered event type
    pub fn select_topic_for_event(&self, event_type: &str) -> Result<String, ConfigError> {
        let registration = self.registry.require(event_type)?;

        match &self.strategy {
            TopicStrategy::SingleWithFilters { default_topic } => Ok(default_topic.clone()),
            TopicStrategy::MultipleByDomain => {
                let topic = kebab_case(&registration.module);
                if topic.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "module '{}' of event type '{event_type}' does not yield a topic name",
                        registration.module
                    )));
                }
                Ok(topic)
            }
            TopicStrategy::Hybrid {
                default_topic,
                dedicated_topics,
            } => Ok(dedicated_topics
                .get(event_type)
                .or(registration.dedicated_topic.as_ref())
                .unwrap_or(default_topic)
                .clone()),
        }
    }

    pub fn select_topic<E: IntegrationEvent>(&self) -> Result<String, ConfigError> {
        self.select_topic_for_event(E::EVENT_TYPE)
    }

    /// Distinct physical topics, for provisioning and the operator surface
    pub fn topics(&self) -> BTreeSet<String> {
        let mut topics: BTreeSet<String> = self
            .registry
            .event_types()
            .filter_map(|event_type| self.select_topic_for_event(event_type).ok())
            .collect();
        if let Some(default_topic) = self.strategy.default_topic() {
            topics.insert(default_topic.to_string());
        }
        topics
    }
}

/// `ServiceCatalogs` -> `service-catalogs`, `HTTPServer` -> `http-server`,
/// `search_index` -> `search-index`
pub fn kebab_case(name: &str) -> String {
    let chars: Vec<char> = name.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
                let boundary = prev.is_ascii_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_ascii_uppercase() && next_is_lower);
                if boundary && !out.ends_with('-') {
                    out.push('-');
                }
            }
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }

    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EventTypeRegistration;

    fn registry() -> Arc<EventTypeRegistry> {
        Arc::new(
            EventTypeRegistry::builder()
                .register_raw(EventTypeRegistration::new("OrderPlaced", "Orders"))
                .register_raw(EventTypeRegistration::new("DocumentUploaded", "Documents"))
                .register_raw(EventTypeRegistration::new("DocumentVerified", "Documents"))
                .register_raw(EventTypeRegistration::new("CatalogPublished", "ServiceCatalogs"))
                .register_raw(
                    EventTypeRegistration::new("PaymentCaptured", "Payments")
                        .with_dedicated_topic("payments-critical"),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_single_with_filters_happy_path() {
        let selector =
            TopicStrategySelector::new(TopicStrategy::single("app-events"), registry()).unwrap();
        assert_eq!(selector.select_topic_for_event("OrderPlaced").unwrap(), "app-events");
        // Hints are ignored by this strategy
        assert_eq!(
            selector.select_topic_for_event("PaymentCaptured").unwrap(),
            "app-events"
        );
        assert_eq!(selector.topics().into_iter().collect::<Vec<_>>(), vec!["app-events"]);
    }

    #[test]
    fn test_multiple_by_domain() {
        let selector =
            TopicStrategySelector::new(TopicStrategy::MultipleByDomain, registry()).unwrap();

        let uploaded = selector.select_topic_for_event("DocumentUploaded").unwrap();
        let verified = selector.select_topic_for_event("DocumentVerified").unwrap();
        let order = selector.select_topic_for_event("OrderPlaced").unwrap();

        assert_eq!(uploaded, "documents");
        assert_eq!(uploaded, verified);
        assert_ne!(uploaded, order);
        assert_eq!(
            selector.select_topic_for_event("CatalogPublished").unwrap(),
            "service-catalogs"
        );
    }

    #[test]
    fn test_hybrid_dedicated_and_fallback() {
        let strategy = TopicStrategy::Hybrid {
            default_topic: "app-events".to_string(),
            dedicated_topics: BTreeMap::from([(
                "OrderPlaced".to_string(),
                "orders-critical".to_string(),
            )]),
        };
        let selector = TopicStrategySelector::new(strategy, registry()).unwrap();

        assert_eq!(selector.select_topic_for_event("OrderPlaced").unwrap(), "orders-critical");
        assert_eq!(
            selector.select_topic_for_event("PaymentCaptured").unwrap(),
            "payments-critical"
        );
        // Unmapped types share the default topic
        assert_eq!(
            selector.select_topic_for_event("DocumentUploaded").unwrap(),
            selector.select_topic_for_event("CatalogPublished").unwrap()
        );
        assert_eq!(selector.topics().len(), 3);
    }

    #[test]
    fn test_hybrid_config_overrides_hint() {
        let strategy = TopicStrategy::Hybrid {
            default_topic: "app-events".to_string(),
            dedicated_topics: BTreeMap::from([(
                "PaymentCaptured".to_string(),
                "payments".to_string(),
            )]),
        };
        let selector = TopicStrategySelector::new(strategy, registry()).unwrap();
        assert_eq!(selector.select_topic_for_event("PaymentCaptured").unwrap(), "payments");
    }

    #[test]
    fn test_unregistered_type_is_config_error() {
        let selector =
            TopicStrategySelector::new(TopicStrategy::single("app-events"), registry()).unwrap();
        let err = selector.select_topic_for_event("Unknown").unwrap_err();
        assert!(matches!(err, ConfigError::UnregisteredEventType(_)));
    }

    #[test]
    fn test_hybrid_rejects_unknown_allow_list_entry() {
        let strategy = TopicStrategy::Hybrid {
            default_topic: "app-events".to_string(),
            dedicated_topics: BTreeMap::from([("Ghost".to_string(), "ghosts".to_string())]),
        };
        assert!(TopicStrategySelector::new(strategy, registry()).is_err());
    }

    #[test]
    fn test_empty_default_topic_rejected() {
        assert!(TopicStrategySelector::new(TopicStrategy::single("  "), registry()).is_err());
    }

    #[test]
    fn test_module_without_letters_rejected() {
        let registry = Arc::new(
            EventTypeRegistry::builder()
                .register_raw(EventTypeRegistration::new("Odd", "::"))
                .build()
                .unwrap(),
        );
        assert!(TopicStrategySelector::new(TopicStrategy::MultipleByDomain, registry).is_err());
    }

    #[test]
    fn test_colliding_module_topics_rejected() {
        let collisions = [
            ("Search", "search"),
            ("Ção", "Ñão"),
            ("SearchIndex", "search_index"),
        ];
        for (first, second) in collisions {
            let registry = Arc::new(
                EventTypeRegistry::builder()
                    .register_raw(EventTypeRegistration::new("Indexed", first))
                    .register_raw(EventTypeRegistration::new("Reindexed", second))
                    .build()
                    .unwrap(),
            );
            let err =
                TopicStrategySelector::new(TopicStrategy::MultipleByDomain, registry.clone())
                    .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{first} / {second}");

            // Other strategies do not derive topics from module names
            let single = TopicStrategySelector::new(TopicStrategy::single("app-events"), registry);
            assert!(single.is_ok());
        }
    }

    #[test]
    fn test_from_config() {
        let config = MessagingConfig {
            topic_strategy: TopicStrategyKind::Hybrid,
            dedicated_topics: vec![("OrderPlaced".into(), "orders".into())],
            ..Default::default()
        };
        let strategy = TopicStrategy::from_config(&config);
        assert_eq!(strategy.kind(), TopicStrategyKind::Hybrid);
        let selector = TopicStrategySelector::new(strategy, registry()).unwrap();
        assert_eq!(selector.select_topic_for_event("OrderPlaced").unwrap(), "orders");
        assert_eq!(selector.select_topic_for_event("DocumentUploaded").unwrap(), "app-events");
    }

    #[test]
    fn test_kebab_case() {
        assert_eq!(kebab_case("Documents"), "documents");
        assert_eq!(kebab_case("ServiceCatalogs"), "service-catalogs");
        assert_eq!(kebab_case("HTTPServer"), "http-server");
        assert_eq!(kebab_case("search_index"), "search-index");
        assert_eq!(kebab_case("Marketplace.Locations"), "marketplace-locations");
        assert_eq!(kebab_case("::"), "");
    }
}

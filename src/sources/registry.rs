//! The source registry: an immutable catalog of `SourceDefinition`s plus
//! the connector instances that implement them, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::sources::{Classification, FillPolicy, MobilityKind, NormalizationSpec, SourceConnector};

#[derive(Debug, Clone)]
pub struct SourceDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub classification: Classification,
    pub requires_key: bool,
    pub can_run_without_key: bool,
    pub geo_inputs_used: &'static [&'static str],
    pub cache_key_fields: &'static [&'static str],
    pub description: &'static str,
    /// Feature columns this connector produces, each mapped to the
    /// sub-index child it feeds.
    pub features: &'static [(&'static str, &'static str)],
    pub ttl: Duration,
    pub fill_policy: FillPolicy,
    pub normalization: NormalizationSpec,
    pub mobility_kind: Option<MobilityKind>,
}

impl SourceDefinition {
    pub fn produces(&self, feature: &str) -> bool {
        self.features.iter().any(|(f, _)| *f == feature)
    }

    pub fn child_for_feature(&self, feature: &str) -> Option<&'static str> {
        self.features
            .iter()
            .find(|(f, _)| *f == feature)
            .map(|(_, child)| *child)
    }
}

/// Enumeration order is registration order, matching spec.md §4.2.
pub struct SourceRegistry {
    connectors: Vec<Arc<dyn SourceConnector>>,
    by_id: HashMap<&'static str, usize>,
}

impl SourceRegistry {
    pub fn new(connectors: Vec<Arc<dyn SourceConnector>>) -> Self {
        let mut by_id = HashMap::new();
        for (index, connector) in connectors.iter().enumerate() {
            by_id.insert(connector.definition().id, index);
        }
        Self { connectors, by_id }
    }

    pub fn default_registry() -> Self {
        use crate::sources::{
            drought::DroughtConnector, economic::EconomicIndexConnector, fuel::FuelPriceConnector,
            health::PublicHealthConnector, media::MediaAttentionConnector,
            mobility::MobilityConnector, storms::StormEventsConnector, weather::WeatherConnector,
        };

        let connectors: Vec<Arc<dyn SourceConnector>> = vec![
            Arc::new(EconomicIndexConnector::new()),
            Arc::new(FuelPriceConnector::new()),
            Arc::new(WeatherConnector::new()),
            Arc::new(DroughtConnector::new()),
            Arc::new(StormEventsConnector::new()),
            Arc::new(MobilityConnector::new()),
            Arc::new(MediaAttentionConnector::new()),
            Arc::new(PublicHealthConnector::new()),
        ];
        Self::new(connectors)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn SourceConnector>> {
        self.by_id.get(id).map(|&i| &self.connectors[i])
    }

    /// Connectors in registration order, the order used everywhere else
    /// (`/sources`, fan-out, journaling) so output is stable across runs.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SourceConnector>> {
        self.connectors.iter()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_no_duplicate_ids() {
        let registry = SourceRegistry::default_registry();
        let mut seen = std::collections::HashSet::new();
        for connector in registry.iter() {
            assert!(seen.insert(connector.definition().id), "duplicate source id");
        }
    }

    #[test]
    fn registration_order_is_enumeration_order() {
        let registry = SourceRegistry::default_registry();
        let ids: Vec<&str> = registry.iter().map(|c| c.definition().id).collect();
        assert_eq!(ids, registry.iter().map(|c| c.definition().id).collect::<Vec<_>>());
        assert_eq!(ids[0], "economic_index");
    }
}

//! Per-pipeline connector bindings.

use std::fmt;

use indexmap::IndexMap;
use ripple_core::normalize_ident;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::ConnectorCatalog;
use crate::config::{ConnectorConfig, Direction};
use crate::error::ConfigError;

/// Stable identifier of one connector binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorHandle(pub Uuid);

impl ConnectorHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectorHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The connectors bound to one pipeline's tables and views, in the order
/// they were registered.
///
/// Registration validates kinds and parameters but opens nothing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectorRegistry {
    bindings: IndexMap<ConnectorHandle, ConnectorConfig>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        catalog: &ConnectorCatalog,
        mut config: ConnectorConfig,
    ) -> Result<ConnectorHandle, ConfigError> {
        catalog.validate(&config)?;
        config.table = config.table_name();
        if let Some(name) = &config.name {
            if self.find_by_name(name).is_some() {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
        }
        let handle = ConnectorHandle::new();
        debug!(
            connector = %handle,
            table = %config.table,
            direction = %config.direction,
            transport = %config.transport.kind,
            format = %config.format.kind,
            "connector registered"
        );
        self.bindings.insert(handle, config);
        Ok(handle)
    }

    /// Handles bound to `table` in `direction`, in registration order.
    pub fn resolve(&self, table: &str, direction: Direction) -> Vec<ConnectorHandle> {
        let table = normalize_ident(table);
        self.bindings
            .iter()
            .filter(|(_, c)| c.table == table && c.direction == direction)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn get(&self, handle: ConnectorHandle) -> Option<&ConnectorConfig> {
        self.bindings.get(&handle)
    }

    pub fn remove(&mut self, handle: ConnectorHandle) -> Option<ConnectorConfig> {
        self.bindings.shift_remove(&handle)
    }

    pub fn find_by_name(&self, name: &str) -> Option<ConnectorHandle> {
        self.bindings
            .iter()
            .find(|(_, c)| c.name.as_deref() == Some(name))
            .map(|(h, _)| *h)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectorHandle, &ConnectorConfig)> {
        self.bindings.iter().map(|(h, c)| (*h, c))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FormatConfig, TransportConfig};

    fn kafka_input(table: &str) -> ConnectorConfig {
        ConnectorConfig::input(
            table,
            TransportConfig::new("kafka")
                .param("bootstrap.servers", "redpanda:9092")
                .param("topics", "fraud_demo_large_demographics"),
            FormatConfig::new("csv"),
        )
    }

    #[test]
    fn register_and_resolve_by_table_and_direction() {
        let catalog = ConnectorCatalog::builtin();
        let mut registry = ConnectorRegistry::new();
        let a = registry.register(&catalog, kafka_input("DEMOGRAPHICS")).unwrap();
        let b = registry.register(&catalog, kafka_input("demographics")).unwrap();
        let out = registry
            .register(
                &catalog,
                ConnectorConfig::output(
                    "demographics",
                    TransportConfig::new("http"),
                    FormatConfig::new("json"),
                ),
            )
            .unwrap();

        assert_eq!(registry.resolve("Demographics", Direction::Input), vec![a, b]);
        assert_eq!(registry.resolve("demographics", Direction::Output), vec![out]);
        assert!(registry.resolve("transactions", Direction::Input).is_empty());
        assert_eq!(registry.get(a).unwrap().table, "demographics");
    }

    #[test]
    fn invalid_configs_leave_the_registry_untouched() {
        let catalog = ConnectorCatalog::builtin();
        let mut registry = ConnectorRegistry::new();
        let mut config = kafka_input("t");
        config.transport.params.remove("topics");
        assert!(matches!(
            registry.register(&catalog, config),
            Err(ConfigError::MissingParameter { .. })
        ));
        let mut config = kafka_input("t");
        config.transport.kind = "carrier-pigeon".into();
        assert_eq!(
            registry.register(&catalog, config),
            Err(ConfigError::UnknownTransport("carrier-pigeon".into()))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn names_are_unique_and_removal_works() {
        let catalog = ConnectorCatalog::builtin();
        let mut registry = ConnectorRegistry::new();
        let handle = registry
            .register(&catalog, kafka_input("t").named("demo"))
            .unwrap();
        assert_eq!(
            registry.register(&catalog, kafka_input("t").named("demo")),
            Err(ConfigError::DuplicateName("demo".into()))
        );
        assert_eq!(registry.find_by_name("demo"), Some(handle));
        assert!(registry.remove(handle).is_some());
        assert!(registry.remove(handle).is_none());
        assert_eq!(registry.len(), 0);
    }
}

//! Service registry
//!
//! Ordered, immutable map from service name to its probe capability. Order is
//! registration order, which is also the order of every health report.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use super::RegisteredService;
use super::probes::{DatabaseProbe, TableProbe};

/// Tables owned by this service, always probed
pub const CORE_TABLES: [&str; 3] = ["system_integrations", "data_sync_jobs", "analytics_events"];

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Service '{name}' is already registered")]
    DuplicateService { name: String },
    #[error("Service '{name}' not found")]
    ServiceNotFound { name: String },
    #[error("Invalid table name '{name}'")]
    InvalidTable { name: String },
}

#[derive(Clone, Default)]
pub struct ServiceRegistry {
    entries: Vec<(String, Arc<dyn RegisteredService>)>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    /// Registry with the store probes: the database itself, each table this
    /// service owns, then the extra tables in the order given.
    pub fn with_store_probes(
        db: DatabaseConnection,
        extra_tables: &[String],
    ) -> Result<Self, RegistryError> {
        let mut builder =
            Self::builder().register("database", Arc::new(DatabaseProbe::new(db.clone())))?;

        let tables = CORE_TABLES
            .iter()
            .map(|table| table.to_string())
            .chain(
                extra_tables
                    .iter()
                    .filter(|table| !CORE_TABLES.contains(&table.as_str()))
                    .cloned(),
            );

        for table in tables {
            let probe = TableProbe::new(db.clone(), &table)
                .map_err(|_| RegistryError::InvalidTable { name: table.clone() })?;
            builder = builder.register(table, Arc::new(probe))?;
        }

        Ok(builder.build())
    }

    /// Service names in registry order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn RegisteredService>, RegistryError> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, service)| Arc::clone(service))
            .ok_or_else(|| RegistryError::ServiceNotFound {
                name: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn RegisteredService>)> {
        self.entries
            .iter()
            .map(|(name, service)| (name.as_str(), service))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct ServiceRegistryBuilder {
    entries: Vec<(String, Arc<dyn RegisteredService>)>,
}

impl ServiceRegistryBuilder {
    /// Append a service; names must be unique
    pub fn register(
        mut self,
        name: impl Into<String>,
        service: Arc<dyn RegisteredService>,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if self.entries.iter().any(|(existing, _)| *existing == name) {
            return Err(RegistryError::DuplicateService { name });
        }
        self.entries.push((name, service));
        Ok(self)
    }

    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Present;

    impl RegisteredService for Present {}

    #[test]
    fn test_registration_order_preserved() {
        let registry = ServiceRegistry::builder()
            .register("members", Arc::new(Present))
            .unwrap()
            .register("events", Arc::new(Present))
            .unwrap()
            .register("donations", Arc::new(Present))
            .unwrap()
            .build();

        assert_eq!(registry.names(), vec!["members", "events", "donations"]);
        assert_eq!(registry.len(), 3);
        assert!(registry.get("events").is_ok());
        assert!(matches!(
            registry.get("library"),
            Err(RegistryError::ServiceNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ServiceRegistry::builder()
            .register("members", Arc::new(Present))
            .unwrap()
            .register("members", Arc::new(Present));

        assert!(matches!(
            result,
            Err(RegistryError::DuplicateService { name }) if name == "members"
        ));
    }
}

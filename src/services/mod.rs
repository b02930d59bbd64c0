//! Service registry and health probe capability.
//!
//! The registry is built once at startup and handed to the health aggregator;
//! it is never mutated afterwards.

pub mod probes;
pub mod registry;

use async_trait::async_trait;

use crate::error::ManagerError;

pub use probes::{DatabaseProbe, TableProbe};
pub use registry::{RegistryError, ServiceRegistry};

/// A service the portal depends on and wants to see in the health report.
///
/// `probe` must be read-only: it is run on every health check and must not
/// create, change, or delete anything. Services without a cheap read-only call
/// keep the default, which only confirms that the service is registered.
#[async_trait]
pub trait RegisteredService: Send + Sync {
    async fn probe(&self) -> Result<(), ManagerError> {
        Ok(())
    }
}

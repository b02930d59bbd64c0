//! # Repository Layer
//!
//! Record store gateway over SeaORM: one repository per table the integration
//! manager owns. Repositories return [`crate::error::ManagerError`] and log
//! store failures before handing them back.

pub mod analytics_event;
pub mod integration;
pub mod sync_job;

pub use analytics_event::AnalyticsEventRepository;
pub use integration::{IntegrationChanges, IntegrationRepository, NewIntegrationRecord};
pub use sync_job::{SyncJobFilter, SyncJobRepository};

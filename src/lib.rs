//! # Portal Integrations Library
//!
//! Integration layer of the portal backend: service health aggregation, the
//! integration registry, sync jobs driven by a background worker, periodic
//! maintenance and bulk table operations, exposed through an admin API.

pub mod analytics;
pub mod auth;
pub mod bulk;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod health;
pub mod maintenance;
pub mod manager;
pub mod models;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod services;
pub mod sync_worker;
pub mod telemetry;
pub use migration;

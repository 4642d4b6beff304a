//! Node healer library
//!
//! This crate provides the core functionality for:
//! - Health signal collection and weighted scoring
//! - Remediation decisions with per-policy cooldowns
//! - Cordon, drain and replacement of unhealthy nodes
//! - Durable remediation records
//! - Per-node evaluation scheduling
//! - Health checks and observability

pub mod cloud;
pub mod cluster;
pub mod collector;
pub mod decision;
pub mod error;
pub mod evaluator;
pub mod health;
pub mod models;
pub mod observability;
pub mod policy;
pub mod remediation;
pub mod scorer;
pub mod status;
pub mod store;

pub use error::{HealerError, Result, RetryClass};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{HealerMetrics, StructuredLogger};
pub use policy::{Policy, PolicyResolver, StaticPolicyResolver};
pub use scorer::Scorer;
pub use status::{StatusBoard, StatusSink};

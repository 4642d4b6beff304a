//! Node remediation: cordon, drain, replace
//!
//! The executor drives the per-node state machine; the drain gate bounds
//! how many nodes may be draining across the whole cluster.

mod drain;
mod executor;
mod gate;

pub use drain::{drain_node, evictable, DrainSummary};
pub use executor::{CompletedRemediation, ExecutorConfig, RemediationExecutor, RemediationOutcome};
pub use gate::{DrainGate, DrainPermit};

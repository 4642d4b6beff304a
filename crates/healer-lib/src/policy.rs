//! Remediation policies and policy resolution
//!
//! A policy is handed to the core as an immutable value per evaluation.
//! The core never embeds policy defaults; whoever builds the resolver
//! (configuration, a CRD watcher, ...) decides them.

use crate::error::{HealerError, Result};
use crate::models::NodeInfo;
use std::collections::BTreeMap;
use std::time::Duration;

/// Remediation policy for a set of nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub name: String,
    /// Label equality selector; empty matches every node
    pub node_selector: BTreeMap<String, String>,
    /// Scores at or above this value are unhealthy
    pub unhealthy_score: f64,
    /// Interval until the next evaluation
    pub evaluation_window: Duration,
    /// Maximum wall-clock time for the drain phase
    pub drain_timeout: Duration,
    /// Minimum time between remediation starts on the same node
    pub cooldown: Duration,
    /// Upper bound on nodes draining at the same time
    pub max_concurrent_drains: usize,
    /// Consecutive failures before a node is halted for operator review
    pub max_remediation_attempts: u32,
}

impl Policy {
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| HealerError::InvalidPolicy {
            policy: self.name.clone(),
            message: message.to_string(),
        };

        if !(0.0..=1.0).contains(&self.unhealthy_score) {
            return Err(invalid("unhealthy_score must be within [0, 1]"));
        }
        if self.evaluation_window.is_zero() {
            return Err(invalid("evaluation_window must be greater than zero"));
        }
        if self.max_concurrent_drains == 0 {
            return Err(invalid("max_concurrent_drains must be at least 1"));
        }
        if self.max_remediation_attempts == 0 {
            return Err(invalid("max_remediation_attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn matches(&self, node: &NodeInfo) -> bool {
        self.node_selector
            .iter()
            .all(|(key, value)| node.labels.get(key) == Some(value))
    }
}

/// Maps a node to zero or one applicable policy
pub trait PolicyResolver: Send + Sync {
    fn resolve(&self, node: &NodeInfo) -> Option<Policy>;
}

/// Resolver over a fixed, ordered list of policies; first match wins
#[derive(Debug, Clone, Default)]
pub struct StaticPolicyResolver {
    policies: Vec<Policy>,
}

impl StaticPolicyResolver {
    /// Validates every policy up front so a bad one never reaches a node
    pub fn new(policies: Vec<Policy>) -> Result<Self> {
        for policy in &policies {
            policy.validate()?;
        }
        Ok(Self { policies })
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }
}

impl PolicyResolver for StaticPolicyResolver {
    fn resolve(&self, node: &NodeInfo) -> Option<Policy> {
        self.policies.iter().find(|p| p.matches(node)).cloned()
    }
}

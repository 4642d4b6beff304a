//! Error taxonomy for the evaluation and remediation pipeline
//!
//! Pure components (scorer, decision engine) never fail. Everything here
//! originates in an I/O-bound collaborator and is surfaced to the evaluation
//! loop, which picks the retry cadence from [`HealerError::retry_class`].

use std::time::Duration;
use thiserror::Error;

use crate::models::RemediationState;

pub type Result<T, E = HealerError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum HealerError {
    /// Signal source unreachable or returned unusable data
    #[error("signal collection failed for node {node}: {message}")]
    Collection { node: String, message: String },

    /// Transport or auth failure against the cluster API
    #[error("cluster API error: {0}")]
    ClusterApi(String),

    /// Eviction refused by a disruption budget
    #[error("eviction of {workload} rejected: {message}")]
    EvictionRejected { workload: String, message: String },

    #[error("drain of node {node} timed out after {timeout:?} with {remaining} workload(s) remaining")]
    DrainTimeout {
        node: String,
        timeout: Duration,
        remaining: usize,
    },

    #[error("cloud provider error: {0}")]
    CloudProvider(String),

    /// Remediation record could not be read or written durably
    #[error("record store error: {0}")]
    Store(String),

    #[error("invalid policy {policy}: {message}")]
    InvalidPolicy { policy: String, message: String },

    #[error("invalid remediation transition for node {node}: {from} -> {to}")]
    InvalidTransition {
        node: String,
        from: RemediationState,
        to: RemediationState,
    },
}

/// How soon a failed cycle should be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry on the next scheduling opportunity
    Immediate,
    /// Retry with per-node exponential backoff
    Backoff,
    /// Wait for the normal evaluation window
    NextWindow,
}

impl HealerError {
    pub fn collection(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collection {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            HealerError::Collection { .. } => RetryClass::Immediate,
            HealerError::ClusterApi(_) | HealerError::Store(_) => RetryClass::Backoff,
            HealerError::EvictionRejected { .. }
            | HealerError::DrainTimeout { .. }
            | HealerError::CloudProvider(_)
            | HealerError::InvalidPolicy { .. }
            | HealerError::InvalidTransition { .. } => RetryClass::NextWindow,
        }
    }

    /// Short machine-friendly label used for metrics and status output
    pub fn kind(&self) -> &'static str {
        match self {
            HealerError::Collection { .. } => "collection",
            HealerError::ClusterApi(_) => "cluster_api",
            HealerError::EvictionRejected { .. } => "eviction_rejected",
            HealerError::DrainTimeout { .. } => "drain_timeout",
            HealerError::CloudProvider(_) => "cloud_provider",
            HealerError::Store(_) => "store",
            HealerError::InvalidPolicy { .. } => "invalid_policy",
            HealerError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

impl From<kube::Error> for HealerError {
    fn from(err: kube::Error) -> Self {
        HealerError::ClusterApi(err.to_string())
    }
}

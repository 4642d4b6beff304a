//! Weighted health scoring
//!
//! Aggregates raw node signals into a single score in [0, 1], where higher
//! means less healthy.

use crate::models::{MetricName, SignalSet};
use std::collections::HashMap;
use tracing::warn;

/// Computes a node health score from weighted signals
#[derive(Debug, Clone)]
pub struct Scorer {
    weights: HashMap<MetricName, f64>,
}

impl Scorer {
    /// Create a scorer, normalizing the weights so they sum to 1.0
    ///
    /// Negative or non-finite weights are dropped. If the remaining weights
    /// sum to zero they are kept as-is and every score is zero.
    pub fn new(weights: HashMap<MetricName, f64>) -> Self {
        let mut weights: HashMap<MetricName, f64> = weights
            .into_iter()
            .filter(|(metric, weight)| {
                let usable = weight.is_finite() && *weight >= 0.0;
                if !usable {
                    warn!(metric = %metric, weight = *weight, "Ignoring unusable signal weight");
                }
                usable
            })
            .collect();

        let total: f64 = weights.values().sum();
        if total > 0.0 {
            for weight in weights.values_mut() {
                *weight /= total;
            }
        }

        Self { weights }
    }

    /// Scorer with the standard signal weights
    pub fn with_default_weights() -> Self {
        Self::new(default_weights())
    }

    pub fn weights(&self) -> &HashMap<MetricName, f64> {
        &self.weights
    }

    /// Weighted sum of clamped signal values
    ///
    /// Missing signals contribute nothing; their weight is not redistributed.
    pub fn calculate_score(&self, signals: &SignalSet) -> f64 {
        self.weights
            .iter()
            .filter_map(|(metric, weight)| {
                let value = *signals.get(metric)?;
                // NaN carries no information
                if value.is_nan() {
                    return None;
                }
                Some(value.clamp(0.0, 1.0) * weight)
            })
            .sum()
    }
}

impl Default for Scorer {
    fn default() -> Self {
        Self::with_default_weights()
    }
}

/// Standard weights: disk I/O wait dominates, the rest share the remainder
pub fn default_weights() -> HashMap<MetricName, f64> {
    HashMap::from([
        (MetricName::from(MetricName::DISK_IO_WAIT), 0.30),
        (MetricName::from(MetricName::NETWORK_DROPS), 0.20),
        (MetricName::from(MetricName::KUBELET_ERRORS), 0.20),
        (MetricName::from(MetricName::MEMORY_PRESSURE), 0.15),
        (MetricName::from(MetricName::CONDITION_FLAPS), 0.15),
    ])
}

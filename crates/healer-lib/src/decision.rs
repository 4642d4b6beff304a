//! Remediation decision engine
//!
//! Stateless: score, policy and remediation history in, decision out.

use crate::models::Decision;
use crate::policy::Policy;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decide using the current wall-clock time
    pub fn evaluate(
        &self,
        score: f64,
        policy: &Policy,
        last_remediation: Option<DateTime<Utc>>,
    ) -> Decision {
        self.evaluate_at(score, policy, last_remediation, Utc::now())
    }

    /// Decide as of `now`
    ///
    /// A score equal to the threshold is unhealthy. A last remediation time
    /// in the future counts as zero elapsed time, so clock skew never opens
    /// the cooldown early.
    pub fn evaluate_at(
        &self,
        score: f64,
        policy: &Policy,
        last_remediation: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Decision {
        let threshold = policy.unhealthy_score;

        if score < threshold {
            return Decision::none("node is healthy");
        }

        if let Some(last) = last_remediation {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < policy.cooldown {
                return Decision::monitor("unhealthy but within cooldown");
            }
        }

        Decision::remediate(format!(
            "score {:.2} exceeds threshold {:.2}",
            score, threshold
        ))
    }
}

//! Evaluation report sinks

use crate::models::{EvaluationReport, RemediationRecord};
use dashmap::DashMap;

/// Receives the report of every evaluation cycle
pub trait StatusSink: Send + Sync {
    fn publish(&self, report: &EvaluationReport);

    /// The node left the cluster
    fn forget(&self, _node: &str) {}
}

/// Latest report per node, served by the status API
#[derive(Debug, Default)]
pub struct StatusBoard {
    reports: DashMap<String, EvaluationReport>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: &str) -> Option<EvaluationReport> {
        self.reports.get(node).map(|r| r.value().clone())
    }

    /// All reports ordered by node name
    pub fn list(&self) -> Vec<EvaluationReport> {
        let mut reports: Vec<_> = self.reports.iter().map(|r| r.value().clone()).collect();
        reports.sort_by(|a, b| a.node.cmp(&b.node));
        reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Reflect a record changed outside an evaluation cycle (operator reset)
    pub fn apply_record(&self, record: &RemediationRecord) {
        let mut entry = self
            .reports
            .entry(record.node.clone())
            .or_insert_with(|| EvaluationReport::new(&record.node));
        let report = entry.value_mut();
        report.state = record.state;
        report.failed_attempts = record.failed_attempts;
        report.last_remediation_time = record.last_remediation_time;
    }
}

impl StatusSink for StatusBoard {
    fn publish(&self, report: &EvaluationReport) {
        self.reports.insert(report.node.clone(), report.clone());
    }

    fn forget(&self, node: &str) {
        self.reports.remove(node);
    }
}

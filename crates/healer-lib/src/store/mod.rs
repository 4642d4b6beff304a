//! Remediation record persistence
//!
//! Records must survive controller restarts: the cooldown and the
//! interrupted-remediation recovery both depend on them.

mod annotation;
mod file;

pub use annotation::{NodeAnnotationStore, RECORD_ANNOTATION};
pub use file::FileRecordStore;

use crate::error::Result;
use crate::models::RemediationRecord;
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self, node: &str) -> Result<Option<RemediationRecord>>;

    /// Durably write the record; returns only once it would survive a crash
    async fn save(&self, record: &RemediationRecord) -> Result<()>;

    /// Forget a node. Removing an unknown node succeeds.
    async fn remove(&self, node: &str) -> Result<()>;
}

/// Process-local store, for tests and single-shot runs
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, RemediationRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load(&self, node: &str) -> Result<Option<RemediationRecord>> {
        Ok(self.records.get(node).map(|r| r.value().clone()))
    }

    async fn save(&self, record: &RemediationRecord) -> Result<()> {
        self.records.insert(record.node.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, node: &str) -> Result<()> {
        self.records.remove(node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemediationState;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryRecordStore::new();
        assert!(store.load("node-1").await.unwrap().is_none());

        let mut record = RemediationRecord::new("node-1");
        record.state = RemediationState::Cooldown;
        store.save(&record).await.unwrap();

        assert_eq!(store.load("node-1").await.unwrap(), Some(record));

        store.remove("node-1").await.unwrap();
        store.remove("node-1").await.unwrap();
        assert!(store.is_empty());
    }
}

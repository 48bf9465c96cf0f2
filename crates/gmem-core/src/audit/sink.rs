//! Audit sinks

use std::sync::Mutex;

use async_trait::async_trait;

use super::{AuditEntry, AuditQuery, AuditRecord};
use crate::error::{StorageError, StorageResult};

/// Append-only destination for audit records.
///
/// `append` assigns the next sequence number and seals the entry against the
/// current chain head atomically, so concurrent writers get a total order.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Seal and persist an entry
    async fn append(&self, entry: AuditEntry) -> StorageResult<AuditRecord>;

    /// Records matching `query`, in sequence order
    async fn query(&self, query: &AuditQuery) -> StorageResult<Vec<AuditRecord>>;

    /// Number of records in the trail
    async fn len(&self) -> StorageResult<u64>;
}

/// In-memory audit sink
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("audit log lock poisoned".into())
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> StorageResult<AuditRecord> {
        let mut records = self.records.lock().map_err(|_| poisoned())?;
        let (sequence, previous_hash) = match records.last() {
            Some(last) => (last.sequence + 1, Some(last.hash.clone())),
            None => (1, None),
        };
        let record = entry.seal(sequence, previous_hash)?;
        records.push(record.clone());
        Ok(record)
    }

    async fn query(&self, query: &AuditQuery) -> StorageResult<Vec<AuditRecord>> {
        let records = self.records.lock().map_err(|_| poisoned())?;
        Ok(query.apply(records.iter()))
    }

    async fn len(&self) -> StorageResult<u64> {
        let records = self.records.lock().map_err(|_| poisoned())?;
        Ok(records.len() as u64)
    }
}

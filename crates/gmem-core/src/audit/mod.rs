//! Audit Logger
//!
//! Append-only, hash-chained record of every Manager call. Each record carries
//! who acted, what they attempted, on which tier and entity, when, and the
//! final decision, so the trail can be read without the entity payloads.
//! Records link to their predecessor through `previous_hash`; `verify_chain`
//! detects any edited, dropped or reordered record.

#[cfg(feature = "sqlite")]
mod migrations;
mod sink;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use sink::{AuditSink, InMemoryAuditSink};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAuditSink;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::types::{Actor, Operation, Tier};
use crate::utils::hash_chain_link;

/// Final outcome of a Manager call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuditDecision {
    /// Authorized; the operation went on to the backend
    Allowed,
    /// Refused by the access policy
    Denied { reason: String },
    /// Refused by validation before any authorization decision
    Rejected { reason: String },
}

impl AuditDecision {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied { .. } => "denied",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Audit entry before it is placed in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id: String,
    pub actor_role: String,
    pub operation: Operation,
    pub tier: Option<Tier>,
    pub entity_id: Option<String>,
    pub decision: AuditDecision,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: &Actor,
        operation: Operation,
        tier: Option<Tier>,
        entity_id: Option<&str>,
        decision: AuditDecision,
    ) -> Self {
        Self {
            actor_id: actor.id.clone(),
            actor_role: actor.role.clone(),
            operation,
            tier,
            entity_id: entity_id.map(String::from),
            decision,
            timestamp: Utc::now(),
        }
    }

    /// Serialized form covered by the chain hash
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Place this entry after `previous` in the chain
    pub fn seal(self, sequence: u64, previous_hash: Option<String>) -> StorageResult<AuditRecord> {
        let hash = hash_chain_link(previous_hash.as_deref(), sequence, &self.canonical_json()?);
        Ok(AuditRecord {
            sequence,
            entry: self,
            previous_hash,
            hash,
        })
    }
}

/// An entry sealed into the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic, starts at 1, assigned in arrival order
    pub sequence: u64,
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub previous_hash: Option<String>,
    pub hash: String,
}

impl AuditRecord {
    /// Recompute this record's hash from its contents
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        Ok(hash_chain_link(
            self.previous_hash.as_deref(),
            self.sequence,
            &self.entry.canonical_json()?,
        ))
    }
}

/// Filter over the audit trail
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub actor_id: Option<String>,
    pub tier: Option<Tier>,
    pub entity_id: Option<String>,
    pub operation: Option<Operation>,
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_entity(id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn for_actor(id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        let entry = &record.entry;
        self.actor_id.as_ref().is_none_or(|a| &entry.actor_id == a)
            && self.tier.is_none_or(|t| entry.tier == Some(t))
            && self
                .entity_id
                .as_ref()
                .is_none_or(|id| entry.entity_id.as_ref() == Some(id))
            && self.operation.is_none_or(|op| entry.operation == op)
            && self.since.is_none_or(|since| entry.timestamp >= since)
    }

    /// Apply the filter and limit to records in sequence order
    pub fn apply<'a>(&self, records: impl IntoIterator<Item = &'a AuditRecord>) -> Vec<AuditRecord> {
        let mut matched: Vec<AuditRecord> = records
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        if let Some(limit) = self.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }
}

/// Result of walking the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub verified: usize,
    /// Sequence number of the first bad record
    pub first_invalid: Option<u64>,
    pub message: Option<String>,
}

impl ChainVerification {
    fn broken(verified: usize, sequence: u64, message: String) -> Self {
        Self {
            valid: false,
            verified,
            first_invalid: Some(sequence),
            message: Some(message),
        }
    }
}

/// Verify a complete trail, from sequence 1 onward
pub fn verify_chain(records: &[AuditRecord]) -> ChainVerification {
    let mut previous: Option<&AuditRecord> = None;

    for (i, record) in records.iter().enumerate() {
        let expected_sequence = previous.map_or(1, |p| p.sequence + 1);
        if record.sequence != expected_sequence {
            return ChainVerification::broken(
                i,
                record.sequence,
                format!(
                    "sequence gap: expected {}, found {}",
                    expected_sequence, record.sequence
                ),
            );
        }

        let expected_previous = previous.map(|p| p.hash.as_str());
        if record.previous_hash.as_deref() != expected_previous {
            return ChainVerification::broken(
                i,
                record.sequence,
                format!("record {} has a broken chain link", record.sequence),
            );
        }

        match record.compute_hash() {
            Ok(hash) if hash == record.hash => {}
            _ => {
                return ChainVerification::broken(
                    i,
                    record.sequence,
                    format!("record {} has an invalid hash", record.sequence),
                );
            }
        }

        previous = Some(record);
    }

    ChainVerification {
        valid: true,
        verified: records.len(),
        first_invalid: None,
        message: None,
    }
}

/// Front end the Manager writes through
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAuditSink::new()))
    }

    /// Append one entry, timestamped now
    pub async fn record(
        &self,
        actor: &Actor,
        operation: Operation,
        tier: Option<Tier>,
        entity_id: Option<&str>,
        decision: AuditDecision,
    ) -> StorageResult<AuditRecord> {
        let entry = AuditEntry::new(actor, operation, tier, entity_id, decision);
        self.sink.append(entry).await
    }

    pub async fn query(&self, query: &AuditQuery) -> StorageResult<Vec<AuditRecord>> {
        self.sink.query(query).await
    }

    pub async fn len(&self) -> StorageResult<u64> {
        self.sink.len().await
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}

//! Tier Storage Backends
//!
//! Each tier persists through a `TierBackend`. Backends store opaque,
//! already-serialized versions and know nothing about policy or auditing;
//! the Manager is the only caller. Writes are compare-and-swap on the version
//! number, so two writers racing on the same id cannot both land version N+1.

mod memory;
#[cfg(feature = "sqlite")]
mod migrations;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{MemoryEntity, Tombstone};
use crate::error::{StorageError, StorageResult};
use crate::types::{Sensitivity, Tier};
use crate::utils::{content_hash, verify_content_hash};

/// What a stored version holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordContent {
    /// Canonical payload JSON and its SHA-256
    Payload { checksum: String, body: String },
    /// Logical deletion marker
    Tombstone { deleted_by: String },
}

/// One persisted version of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub tier: Tier,
    pub version: u64,
    pub owner: String,
    pub sensitivity: Sensitivity,
    pub created_at: DateTime<Utc>,
    pub written_at: DateTime<Utc>,
    pub content: RecordContent,
}

/// Why a stored version could not be turned back into an entity
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("version is a tombstone")]
    Tombstoned,

    #[error("checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch { stored: String, computed: String },

    #[error("undecodable payload: {0}")]
    Malformed(String),

    #[error("payload belongs to {found}, stored under {expected}")]
    TierMismatch { expected: Tier, found: Tier },
}

impl StoredRecord {
    /// Serialize an entity version for storage
    pub fn from_entity(entity: &MemoryEntity) -> Result<Self, serde_json::Error> {
        let body = entity.payload.canonical_json()?;
        Ok(Self {
            id: entity.id.clone(),
            tier: entity.tier(),
            version: entity.version,
            owner: entity.owner.clone(),
            sensitivity: entity.sensitivity,
            created_at: entity.created_at,
            written_at: entity.updated_at,
            content: RecordContent::Payload {
                checksum: entity.checksum.clone(),
                body,
            },
        })
    }

    /// Tombstone version following `latest`
    pub fn tombstone_after(latest: &StoredRecord, deleted_by: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: latest.id.clone(),
            tier: latest.tier,
            version: latest.version + 1,
            owner: latest.owner.clone(),
            sensitivity: latest.sensitivity,
            created_at: latest.created_at,
            written_at: at,
            content: RecordContent::Tombstone {
                deleted_by: deleted_by.to_string(),
            },
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.content, RecordContent::Tombstone { .. })
    }

    pub fn checksum(&self) -> Option<&str> {
        match &self.content {
            RecordContent::Payload { checksum, .. } => Some(checksum),
            RecordContent::Tombstone { .. } => None,
        }
    }

    /// Tombstone marker, when this version is one
    pub fn tombstone(&self) -> Option<Tombstone> {
        match &self.content {
            RecordContent::Tombstone { deleted_by } => Some(Tombstone {
                deleted_by: deleted_by.clone(),
                deleted_at: self.written_at,
                version: self.version,
            }),
            RecordContent::Payload { .. } => None,
        }
    }

    /// Verify the checksum and rebuild the entity
    pub fn decode(&self) -> Result<MemoryEntity, DecodeError> {
        let RecordContent::Payload { checksum, body } = &self.content else {
            return Err(DecodeError::Tombstoned);
        };

        if !verify_content_hash(body, checksum) {
            return Err(DecodeError::ChecksumMismatch {
                stored: checksum.clone(),
                computed: content_hash(body),
            });
        }

        let payload: crate::entity::EntityPayload =
            serde_json::from_str(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        if payload.tier() != self.tier {
            return Err(DecodeError::TierMismatch {
                expected: self.tier,
                found: payload.tier(),
            });
        }

        Ok(MemoryEntity {
            id: self.id.clone(),
            owner: self.owner.clone(),
            sensitivity: self.sensitivity,
            created_at: self.created_at,
            updated_at: self.written_at,
            version: self.version,
            checksum: checksum.clone(),
            payload,
        })
    }
}

/// Options for `TierBackend::list`
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilter {
    /// Also list ids whose latest version is a tombstone
    pub include_tombstoned: bool,
}

impl ListFilter {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            include_tombstoned: true,
        }
    }
}

/// Per-tier counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    pub live: u64,
    pub tombstoned: u64,
    pub versions: u64,
}

/// Persistence contract for one tier
pub trait TierBackend: Send + Sync {
    /// Tier this backend stores
    fn tier(&self) -> Tier;

    /// Persist a new version. `record.version` must be exactly one past the
    /// latest stored version (1 for a new id), else `StorageError::Conflict`.
    fn put(&self, record: StoredRecord) -> StorageResult<()>;

    /// Latest version (tombstones included) or an explicit one
    fn get(&self, id: &str, version: Option<u64>) -> StorageResult<StoredRecord>;

    /// Every version of `id`, oldest first (empty when unknown)
    fn versions(&self, id: &str) -> StorageResult<Vec<StoredRecord>>;

    /// Ids in insertion order
    fn list(&self, filter: &ListFilter) -> StorageResult<Vec<String>>;

    /// Whether `id` was ever stored here, tombstoned or not
    fn exists(&self, id: &str) -> StorageResult<bool>;

    /// Physically remove every version of `id`. Only WORKING backends accept
    /// this; returns whether anything was removed.
    fn purge(&self, id: &str) -> StorageResult<bool>;

    fn stats(&self) -> StorageResult<TierStats>;

    /// Append a tombstone version after `expected_version`
    fn tombstone(
        &self,
        id: &str,
        expected_version: u64,
        deleted_by: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<StoredRecord> {
        let latest = self.get(id, None)?;
        if latest.version != expected_version {
            return Err(StorageError::Conflict {
                expected: expected_version,
                actual: latest.version,
            });
        }
        let marker = StoredRecord::tombstone_after(&latest, deleted_by, at);
        self.put(marker.clone())?;
        Ok(marker)
    }
}

pub(crate) fn check_next_version(record: &StoredRecord, latest: u64) -> StorageResult<()> {
    if record.version != latest + 1 {
        return Err(StorageError::Conflict {
            expected: record.version.saturating_sub(1),
            actual: latest,
        });
    }
    Ok(())
}

pub(crate) fn refuse_purge(tier: Tier) -> StorageError {
    StorageError::Unavailable(format!("{} tier does not allow physical deletion", tier))
}

/// One backend per tier
#[derive(Clone)]
pub struct TierBackends {
    working: Arc<dyn TierBackend>,
    episodic: Arc<dyn TierBackend>,
    semantic: Arc<dyn TierBackend>,
    graph: Arc<dyn TierBackend>,
}

impl TierBackends {
    /// Assemble from four backends; each must report the tier of its slot
    pub fn new(
        working: Arc<dyn TierBackend>,
        episodic: Arc<dyn TierBackend>,
        semantic: Arc<dyn TierBackend>,
        graph: Arc<dyn TierBackend>,
    ) -> StorageResult<Self> {
        for (expected, backend) in [
            (Tier::Working, &working),
            (Tier::Episodic, &episodic),
            (Tier::Semantic, &semantic),
            (Tier::Graph, &graph),
        ] {
            if backend.tier() != expected {
                return Err(StorageError::Unavailable(format!(
                    "backend for {} reports tier {}",
                    expected,
                    backend.tier()
                )));
            }
        }
        Ok(Self {
            working,
            episodic,
            semantic,
            graph,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            working: Arc::new(InMemoryBackend::new(Tier::Working)),
            episodic: Arc::new(InMemoryBackend::new(Tier::Episodic)),
            semantic: Arc::new(InMemoryBackend::new(Tier::Semantic)),
            graph: Arc::new(InMemoryBackend::new(Tier::Graph)),
        }
    }

    /// One SQLite file per tier (`<tier>.db`) under `dir`
    #[cfg(feature = "sqlite")]
    pub fn sqlite(dir: &std::path::Path) -> StorageResult<Self> {
        let open = |tier: Tier| -> StorageResult<Arc<dyn TierBackend>> {
            let path = dir.join(format!("{}.db", tier.as_str()));
            Ok(Arc::new(SqliteBackend::open(&path, tier)?))
        };
        Ok(Self {
            working: open(Tier::Working)?,
            episodic: open(Tier::Episodic)?,
            semantic: open(Tier::Semantic)?,
            graph: open(Tier::Graph)?,
        })
    }

    pub fn get(&self, tier: Tier) -> &Arc<dyn TierBackend> {
        match tier {
            Tier::Working => &self.working,
            Tier::Episodic => &self.episodic,
            Tier::Semantic => &self.semantic,
            Tier::Graph => &self.graph,
        }
    }

    /// Replace the backend for one tier
    pub fn with(mut self, backend: Arc<dyn TierBackend>) -> Self {
        match backend.tier() {
            Tier::Working => self.working = backend,
            Tier::Episodic => self.episodic = backend,
            Tier::Semantic => self.semantic = backend,
            Tier::Graph => self.graph = backend,
        }
        self
    }
}

impl std::fmt::Debug for TierBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierBackends").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[test]
    fn test_decode_verifies_checksum() {
        let rec = record("x", Tier::Semantic);
        let entity = rec.decode().unwrap();
        assert_eq!(entity.payload.checksum().unwrap(), entity.checksum);

        let mut corrupted = rec.clone();
        if let RecordContent::Payload { body, .. } = &mut corrupted.content {
            *body = body.replace("fact", "fiction");
        }
        assert!(matches!(
            corrupted.decode(),
            Err(DecodeError::ChecksumMismatch { .. })
        ));

        let mut wrong_tier = rec.clone();
        wrong_tier.tier = Tier::Graph;
        assert!(matches!(
            wrong_tier.decode(),
            Err(DecodeError::TierMismatch { .. })
        ));
    }

    #[test]
    fn test_tombstone_marker() {
        let rec = record("x", Tier::Episodic);
        let marker = StoredRecord::tombstone_after(&rec, "admin-1", Utc::now());
        assert_eq!(marker.version, 2);
        assert_eq!(marker.decode(), Err(DecodeError::Tombstoned));
        let tombstone = marker.tombstone().unwrap();
        assert_eq!(tombstone.deleted_by, "admin-1");
        assert_eq!(tombstone.version, 2);
    }

    #[test]
    fn test_backends_reject_mismatched_slots() {
        let wrong: Arc<dyn TierBackend> = Arc::new(InMemoryBackend::new(Tier::Graph));
        let ok = TierBackends::in_memory();
        let result = TierBackends::new(
            wrong,
            ok.get(Tier::Episodic).clone(),
            ok.get(Tier::Semantic).clone(),
            ok.get(Tier::Graph).clone(),
        );
        assert!(result.is_err());
    }
}

//! In-memory reference backend.
//!
//! Deterministic and test-friendly. Durable deployments should use
//! `SqliteBackend` or another engine behind the same trait.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{check_next_version, refuse_purge, ListFilter, StoredRecord, TierBackend, TierStats};
use crate::error::{StorageError, StorageResult};
use crate::types::Tier;

#[derive(Default)]
struct TierState {
    /// Ids in first-insertion order
    order: Vec<String>,
    versions: HashMap<String, Vec<StoredRecord>>,
}

/// Versioned in-memory store for one tier
pub struct InMemoryBackend {
    tier: Tier,
    state: RwLock<TierState>,
}

impl InMemoryBackend {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            state: RwLock::new(TierState::default()),
        }
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, TierState>> {
        self.state
            .read()
            .map_err(|_| StorageError::Unavailable(format!("{} tier lock poisoned", self.tier)))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, TierState>> {
        self.state
            .write()
            .map_err(|_| StorageError::Unavailable(format!("{} tier lock poisoned", self.tier)))
    }
}

impl TierBackend for InMemoryBackend {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn put(&self, record: StoredRecord) -> StorageResult<()> {
        let mut state = self.write()?;
        let latest = state
            .versions
            .get(&record.id)
            .and_then(|v| v.last())
            .map_or(0, |r| r.version);
        check_next_version(&record, latest)?;

        if latest == 0 {
            state.order.push(record.id.clone());
        }
        state
            .versions
            .entry(record.id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn get(&self, id: &str, version: Option<u64>) -> StorageResult<StoredRecord> {
        let state = self.read()?;
        let versions = state
            .versions
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let found = match version {
            Some(v) => versions.iter().find(|r| r.version == v),
            None => versions.last(),
        };
        found
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}@{}", id, version.unwrap_or(0))))
    }

    fn versions(&self, id: &str) -> StorageResult<Vec<StoredRecord>> {
        let state = self.read()?;
        Ok(state.versions.get(id).cloned().unwrap_or_default())
    }

    fn list(&self, filter: &ListFilter) -> StorageResult<Vec<String>> {
        let state = self.read()?;
        Ok(state
            .order
            .iter()
            .filter(|id| {
                filter.include_tombstoned
                    || state
                        .versions
                        .get(*id)
                        .and_then(|v| v.last())
                        .is_some_and(|r| !r.is_tombstone())
            })
            .cloned()
            .collect())
    }

    fn exists(&self, id: &str) -> StorageResult<bool> {
        Ok(self.read()?.versions.contains_key(id))
    }

    fn purge(&self, id: &str) -> StorageResult<bool> {
        if self.tier != Tier::Working {
            return Err(refuse_purge(self.tier));
        }
        let mut state = self.write()?;
        let removed = state.versions.remove(id).is_some();
        if removed {
            state.order.retain(|existing| existing != id);
        }
        Ok(removed)
    }

    fn stats(&self) -> StorageResult<TierStats> {
        let state = self.read()?;
        let mut stats = TierStats::default();
        for versions in state.versions.values() {
            stats.versions += versions.len() as u64;
            match versions.last() {
                Some(latest) if latest.is_tombstone() => stats.tombstoned += 1,
                Some(_) => stats.live += 1,
                None => {}
            }
        }
        Ok(stats)
    }
}

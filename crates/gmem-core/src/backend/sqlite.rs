//! SQLite tier backend.
//!
//! One connection per tier, so tiers never contend for the same lock.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::migrations;
use super::{
    check_next_version, refuse_purge, ListFilter, RecordContent, StoredRecord, TierBackend,
    TierStats,
};
use crate::error::{StorageError, StorageResult};
use crate::types::{Sensitivity, Tier};

const VERSION_COLUMNS: &str =
    "id, version, owner, sensitivity, created_at, written_at, checksum, body, deleted_by";

/// Row as read from `gmem_versions`
struct VersionRow {
    id: String,
    version: i64,
    owner: String,
    sensitivity: String,
    created_at: i64,
    written_at: i64,
    checksum: Option<String>,
    body: Option<String>,
    deleted_by: Option<String>,
}

impl VersionRow {
    fn map(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            version: row.get(1)?,
            owner: row.get(2)?,
            sensitivity: row.get(3)?,
            created_at: row.get(4)?,
            written_at: row.get(5)?,
            checksum: row.get(6)?,
            body: row.get(7)?,
            deleted_by: row.get(8)?,
        })
    }

    fn into_record(self, tier: Tier) -> StorageResult<StoredRecord> {
        let sensitivity = Sensitivity::parse(&self.sensitivity).ok_or_else(|| {
            StorageError::Serialization(format!("unknown sensitivity '{}'", self.sensitivity))
        })?;
        let content = match (self.deleted_by, self.checksum, self.body) {
            (Some(deleted_by), _, _) => RecordContent::Tombstone { deleted_by },
            (None, Some(checksum), Some(body)) => RecordContent::Payload { checksum, body },
            _ => {
                return Err(StorageError::Serialization(format!(
                    "incomplete version row {}@{}",
                    self.id, self.version
                )));
            }
        };
        Ok(StoredRecord {
            id: self.id,
            tier,
            version: self.version as u64,
            owner: self.owner,
            sensitivity,
            created_at: from_millis(self.created_at)?,
            written_at: from_millis(self.written_at)?,
            content,
        })
    }
}

fn from_millis(ms: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Serialization(format!("timestamp out of range: {}", ms)))
}

/// SQLite-backed store for one tier
pub struct SqliteBackend {
    tier: Tier,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (and migrate) a tier database file
    pub fn open(path: impl AsRef<Path>, tier: Tier) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))?;
        Self::from_connection(conn, tier)
    }

    /// Private in-memory database
    pub fn open_in_memory(tier: Tier) -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, tier)
    }

    fn from_connection(conn: Connection, tier: Tier) -> StorageResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            tier,
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            StorageError::Unavailable(format!("{} tier connection lock poisoned", self.tier))
        })
    }
}

impl TierBackend for SqliteBackend {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn put(&self, record: StoredRecord) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let latest: Option<i64> = tx
            .query_row(
                "SELECT latest_version FROM gmem_entities WHERE id = ?1",
                params![&record.id],
                |row| row.get(0),
            )
            .optional()?;
        let latest = latest.map_or(0, |v| v as u64);
        check_next_version(&record, latest)?;

        let (checksum, body, deleted_by) = match &record.content {
            RecordContent::Payload { checksum, body } => (Some(checksum), Some(body), None),
            RecordContent::Tombstone { deleted_by } => (None, None, Some(deleted_by)),
        };

        if latest == 0 {
            tx.execute(
                "INSERT INTO gmem_entities (id, latest_version, tombstoned, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    &record.id,
                    record.version as i64,
                    record.is_tombstone(),
                    record.created_at.timestamp_millis(),
                ],
            )?;
        } else {
            tx.execute(
                "UPDATE gmem_entities SET latest_version = ?2, tombstoned = ?3 WHERE id = ?1",
                params![&record.id, record.version as i64, record.is_tombstone()],
            )?;
        }

        tx.execute(
            "INSERT INTO gmem_versions (id, version, owner, sensitivity, created_at, written_at,
                                        checksum, body, deleted_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &record.id,
                record.version as i64,
                &record.owner,
                record.sensitivity.as_str(),
                record.created_at.timestamp_millis(),
                record.written_at.timestamp_millis(),
                checksum,
                body,
                deleted_by,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &str, version: Option<u64>) -> StorageResult<StoredRecord> {
        let conn = self.lock()?;
        let row = match version {
            Some(v) => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM gmem_versions WHERE id = ?1 AND version = ?2",
                        VERSION_COLUMNS
                    ),
                    params![id, v as i64],
                    VersionRow::map,
                )
                .optional()?,
            None => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM gmem_versions WHERE id = ?1 ORDER BY version DESC LIMIT 1",
                        VERSION_COLUMNS
                    ),
                    params![id],
                    VersionRow::map,
                )
                .optional()?,
        };
        drop(conn);

        match row {
            Some(row) => row.into_record(self.tier),
            None => Err(StorageError::NotFound(format!(
                "{}@{}",
                id,
                version.unwrap_or(0)
            ))),
        }
    }

    fn versions(&self, id: &str) -> StorageResult<Vec<StoredRecord>> {
        let rows: Vec<VersionRow> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM gmem_versions WHERE id = ?1 ORDER BY version ASC",
                VERSION_COLUMNS
            ))?;
            let mapped = stmt.query_map(params![id], VersionRow::map)?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(|r| r.into_record(self.tier)).collect()
    }

    fn list(&self, filter: &ListFilter) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let sql = if filter.include_tombstoned {
            "SELECT id FROM gmem_entities ORDER BY rowid"
        } else {
            "SELECT id FROM gmem_entities WHERE tombstoned = 0 ORDER BY rowid"
        };
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn exists(&self, id: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM gmem_entities WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn purge(&self, id: &str) -> StorageResult<bool> {
        if self.tier != Tier::Working {
            return Err(refuse_purge(self.tier));
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM gmem_versions WHERE id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM gmem_entities WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn stats(&self) -> StorageResult<TierStats> {
        let conn = self.lock()?;
        let (live, tombstoned): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(tombstoned = 0), 0), COALESCE(SUM(tombstoned = 1), 0)
             FROM gmem_entities",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let versions: i64 =
            conn.query_row("SELECT COUNT(*) FROM gmem_versions", [], |row| row.get(0))?;
        Ok(TierStats {
            live: live as u64,
            tombstoned: tombstoned as u64,
            versions: versions as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{exercise_contract, record};
    use super::*;

    #[test]
    fn test_contract() {
        for tier in Tier::ALL {
            exercise_contract(&SqliteBackend::open_in_memory(tier).unwrap());
        }
    }

    #[test]
    fn test_versions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodic.db");
        let v1 = record("wf-1", Tier::Episodic);
        {
            let backend = SqliteBackend::open(&path, Tier::Episodic).unwrap();
            backend.put(v1.clone()).unwrap();
        }

        let backend = SqliteBackend::open(&path, Tier::Episodic).unwrap();
        assert_eq!(backend.get("wf-1", None).unwrap(), v1);
        assert_eq!(backend.list(&ListFilter::live()).unwrap(), vec!["wf-1"]);
    }

    #[test]
    fn test_corrupted_body_fails_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("semantic.db");
        let backend = SqliteBackend::open(&path, Tier::Semantic).unwrap();
        backend.put(record("k-1", Tier::Semantic)).unwrap();

        let raw = Connection::open(&path).unwrap();
        raw.execute(
            "UPDATE gmem_versions SET body = replace(body, 'fact', 'fable') WHERE id = 'k-1'",
            [],
        )
        .unwrap();

        let stored = backend.get("k-1", None).unwrap();
        assert!(stored.decode().is_err());
    }
}

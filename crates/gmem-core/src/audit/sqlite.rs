//! SQLite-backed audit sink.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::migrations;
use super::{AuditEntry, AuditQuery, AuditRecord, AuditSink};
use crate::error::{StorageError, StorageResult};

/// Audit sink persisting the chain to a `gmem_audit_log` table.
///
/// Thread-safe via internal Mutex. Appends run in an IMMEDIATE transaction so
/// separate processes sharing the file still see a single chain head.
pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
}

impl SqliteAuditSink {
    /// Open (and migrate) the audit log at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))?;
        Self::from_connection(conn)
    }

    /// Private in-memory audit log
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("audit connection lock poisoned".into()))
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, entry: AuditEntry) -> StorageResult<AuditRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT sequence, hash FROM gmem_audit_log ORDER BY sequence DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (sequence, previous_hash) = match head {
            Some((seq, hash)) => (seq as u64 + 1, Some(hash)),
            None => (1, None),
        };

        let record = entry.seal(sequence, previous_hash)?;
        let entry = &record.entry;
        tx.execute(
            "INSERT INTO gmem_audit_log (sequence, actor_id, actor_role, operation, tier, entity_id,
                                         decision, timestamp, entry_json, previous_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.sequence as i64,
                &entry.actor_id,
                &entry.actor_role,
                entry.operation.as_str(),
                entry.tier.map(|t| t.as_str()),
                &entry.entity_id,
                entry.decision.label(),
                entry.timestamp.timestamp_millis(),
                entry.canonical_json()?,
                &record.previous_hash,
                &record.hash,
            ],
        )?;
        tx.commit()?;

        Ok(record)
    }

    async fn query(&self, query: &AuditQuery) -> StorageResult<Vec<AuditRecord>> {
        let mut sql = String::from(
            "SELECT sequence, entry_json, previous_hash, hash FROM gmem_audit_log WHERE 1=1",
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref actor_id) = query.actor_id {
            sql.push_str(" AND actor_id = ?");
            params_vec.push(Box::new(actor_id.clone()));
        }
        if let Some(tier) = query.tier {
            sql.push_str(" AND tier = ?");
            params_vec.push(Box::new(tier.as_str()));
        }
        if let Some(ref entity_id) = query.entity_id {
            sql.push_str(" AND entity_id = ?");
            params_vec.push(Box::new(entity_id.clone()));
        }
        if let Some(operation) = query.operation {
            sql.push_str(" AND operation = ?");
            params_vec.push(Box::new(operation.as_str()));
        }
        if let Some(since) = query.since {
            // Millisecond column: coarse prefilter, refined below
            sql.push_str(" AND timestamp >= ?");
            params_vec.push(Box::new(since.timestamp_millis()));
        }
        sql.push_str(" ORDER BY sequence ASC");

        let rows: Vec<(i64, String, Option<String>, String)> = {
            let conn = self.lock()?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let mapped = stmt.query_map(param_refs.as_slice(), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        let mut records = Vec::with_capacity(rows.len());
        for (sequence, entry_json, previous_hash, hash) in rows {
            let entry: AuditEntry = serde_json::from_str(&entry_json)?;
            records.push(AuditRecord {
                sequence: sequence as u64,
                entry,
                previous_hash,
                hash,
            });
        }

        Ok(query.apply(records.iter()))
    }

    async fn len(&self) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM gmem_audit_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{verify_chain, AuditDecision};
    use crate::types::{Actor, Operation, Tier};

    fn entry(actor: &Actor, operation: Operation, decision: AuditDecision) -> AuditEntry {
        AuditEntry::new(actor, operation, Some(Tier::Episodic), Some("wf-1"), decision)
    }

    #[tokio::test]
    async fn test_append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let admin = Actor::admin("root");

        {
            let sink = SqliteAuditSink::open(&path).unwrap();
            sink.append(entry(&admin, Operation::Store, AuditDecision::Allowed))
                .await
                .unwrap();
            sink.append(entry(&Actor::agent("a-1"), Operation::Retrieve, AuditDecision::denied("no")))
                .await
                .unwrap();
        }

        let sink = SqliteAuditSink::open(&path).unwrap();
        let third = sink
            .append(entry(&admin, Operation::Retrieve, AuditDecision::Allowed))
            .await
            .unwrap();
        assert_eq!(third.sequence, 3);

        let records = sink.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(verify_chain(&records).valid);
        assert_eq!(records[1].entry.decision, AuditDecision::denied("no"));

        let denied = sink.query(&AuditQuery::for_actor("a-1")).await.unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(sink.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rows_cannot_be_rewritten() {
        let sink = SqliteAuditSink::open_in_memory().unwrap();
        sink.append(entry(&Actor::system(), Operation::Store, AuditDecision::Allowed))
            .await
            .unwrap();

        let conn = sink.lock().unwrap();
        assert!(conn
            .execute("UPDATE gmem_audit_log SET actor_id = 'x'", [])
            .is_err());
        assert!(conn.execute("DELETE FROM gmem_audit_log", []).is_err());
    }
}

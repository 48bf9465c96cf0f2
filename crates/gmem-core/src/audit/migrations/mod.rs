//! Audit log database migrations
//!
//! SQL migrations are embedded as strings and executed when the sink opens.

use rusqlite::Connection;

use crate::error::StorageResult;

/// Audit log table SQL (001)
pub const AUDIT_LOG_SQL: &str = include_str!("001_audit_log.sql");

/// Run all audit migrations
pub fn run_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(AUDIT_LOG_SQL)?;
    Ok(())
}

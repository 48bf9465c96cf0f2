//! Tier storage database migrations
//!
//! SQL migrations are embedded as strings and executed when a backend opens.

use rusqlite::Connection;

use crate::error::StorageResult;

/// Tier tables SQL (001)
pub const MEMORY_TABLES_SQL: &str = include_str!("001_memory_tables.sql");

/// Run all tier storage migrations
pub fn run_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(MEMORY_TABLES_SQL)?;
    Ok(())
}

//! Command implementations for gmem CLI.
//!
//! Each submodule implements the logic for a command group. All of them
//! reach storage through a `MemoryManager` opened over the configured data
//! directory, so CLI calls are authorized and audited like any other.

pub mod audit;
pub mod entity;
pub mod graph;
pub mod maintenance;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use gmem_core::audit::SqliteAuditSink;
use gmem_core::types::ROLE_SYSTEM;
use gmem_core::{Actor, MemoryManager, TierBackends};
use serde::Serialize;
use tracing::debug;

use crate::config::Config;

/// Per-invocation state shared by every command
pub struct Context {
    pub config: Config,
    pub actor: Actor,
    pub json: bool,
}

impl Context {
    pub fn new(config: Config, actor: Option<String>, role: Option<String>, json: bool) -> Self {
        Self {
            config,
            actor: resolve_actor(actor, role),
            json,
        }
    }

    /// Open the manager over the SQLite databases in the data directory
    pub fn open_manager(&self) -> Result<MemoryManager> {
        let dir = &self.config.storage.data_dir;
        debug!(data_dir = %dir.display(), actor = %self.actor, "Opening memory manager");
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;

        let backends = TierBackends::sqlite(dir).context("Failed to open tier databases")?;
        let audit = SqliteAuditSink::open(dir.join("audit.db"))
            .context("Failed to open audit database")?;

        let builder = MemoryManager::builder()
            .config(self.config.memory.clone())
            .backends(backends)
            .audit_sink(Arc::new(audit));
        #[cfg(feature = "fastembed")]
        let builder = builder.embedder(Arc::new(gmem_core::embeddings::FastEmbedder::new()));

        builder.build().context("Invalid memory configuration")
    }

    /// Print `value` as pretty JSON
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// `system` unless a role or actor id is given. A bare `--actor` keeps the
/// system role; a bare `--as-role` gets an actor id derived from the role.
fn resolve_actor(actor: Option<String>, role: Option<String>) -> Actor {
    match (actor, role) {
        (None, None) => Actor::system(),
        (Some(id), None) => Actor::new(id, ROLE_SYSTEM),
        (None, Some(role)) => Actor::new(format!("cli-{}", role), role),
        (Some(id), Some(role)) => Actor::new(id, role),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    #[test]
    fn test_resolve_actor() {
        assert_eq!(resolve_actor(None, None), Actor::system());
        assert_eq!(resolve_actor(None, Some("agent".into())), Actor::agent("cli-agent"));
        assert_eq!(
            resolve_actor(Some("ops-2".into()), Some("admin".into())),
            Actor::admin("ops-2")
        );
    }

    #[tokio::test]
    async fn test_open_manager_creates_databases() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage: StorageConfig {
                data_dir: dir.path().join("data"),
            },
            memory: Default::default(),
        };
        let ctx = Context::new(config, None, None, false);
        let manager = ctx.open_manager().unwrap();
        let stats = manager.stats(&ctx.actor).await.unwrap();
        assert_eq!(stats.audit_records, 1);
        for name in ["working.db", "episodic.db", "semantic.db", "graph.db", "audit.db"] {
            assert!(dir.path().join("data").join(name).exists());
        }
    }
}

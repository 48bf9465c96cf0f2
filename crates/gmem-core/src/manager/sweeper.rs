//! Working-memory TTL sweeper.
//!
//! Expired WORKING entries are already invisible to reads; the sweeper
//! reclaims their storage. It runs as a Manager operation, so every sweep is
//! authorized and audited like any other call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::MemoryManager;
use crate::backend::ListFilter;
use crate::error::{ErrorContext, MemoryError, MemoryResult};
use crate::types::{Actor, Operation, Permission, Tier};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub purged: usize,
}

impl MemoryManager {
    /// Physically remove WORKING entries whose TTL has elapsed. Needs Delete
    /// on the WORKING tier.
    pub async fn sweep_expired(&self, actor: &Actor) -> MemoryResult<SweepReport> {
        let ctx = ErrorContext::new(Operation::SweepExpired, Some(Tier::Working), None);
        self.authorize_tier(actor, &ctx, Tier::Working, &[Permission::Delete])
            .await?;
        self.record_allowed(actor, &ctx).await?;

        let backend = self.backend(Tier::Working);
        let storage = |e| MemoryError::from_storage(ctx.clone(), e);
        let ids = backend.list(&ListFilter::all()).map_err(storage)?;
        let now = Utc::now();

        let mut report = SweepReport::default();
        for id in ids {
            report.examined += 1;
            let versions = backend.versions(&id).map_err(storage)?;
            let Some(payload) = versions.iter().find(|r| !r.is_tombstone()) else {
                continue;
            };
            match payload.decode() {
                Ok(entity) if entity.is_expired_at(now) => {
                    if backend.purge(&id).map_err(storage)? {
                        report.purged += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(entity_id = %id, error = %e, "Skipping undecodable working entry");
                }
            }
        }

        if report.purged > 0 {
            info!(
                purged = report.purged,
                examined = report.examined,
                "Purged expired working entries"
            );
        }
        Ok(report)
    }
}

/// Handle to a running sweeper; stops the task when stopped or dropped
#[derive(Debug)]
pub struct SweeperHandle {
    abort_handle: AbortHandle,
    interval: Duration,
}

impl SweeperHandle {
    pub fn stop(&self) {
        self.abort_handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort_handle.is_finished()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}

/// Run `sweep_expired` as `actor` every `every`, starting immediately
pub fn spawn_ttl_sweeper(
    manager: Arc<MemoryManager>,
    actor: Actor,
    every: Duration,
) -> SweeperHandle {
    let every = every.max(Duration::from_millis(1));
    let handle = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match manager.sweep_expired(&actor).await {
                Ok(report) => debug!(
                    examined = report.examined,
                    purged = report.purged,
                    "TTL sweep finished"
                ),
                Err(e) => error!(error = %e, "TTL sweep failed"),
            }
        }
    });

    info!(interval_ms = every.as_millis() as u64, "TTL sweeper started");
    SweeperHandle {
        abort_handle: handle.abort_handle(),
        interval: every,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_support::{admin, agent, plant_expired};
    use super::*;
    use crate::entity::NewEntity;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_expired_entries_invisible_then_purged() {
        let manager = MemoryManager::in_memory();
        plant_expired(&manager, "stale-1", 120);
        let fresh = manager
            .store(&admin(), NewEntity::working("fresh", json!(1), 600))
            .await
            .unwrap();

        let err = manager.retrieve(&admin(), "stale-1", Tier::Working).await.unwrap_err();
        assert!(err.is_not_found());

        let report = manager.sweep_expired(&admin()).await.unwrap();
        assert_eq!(report, SweepReport { examined: 2, purged: 1 });
        assert!(!manager.backend(Tier::Working).exists("stale-1").unwrap());
        assert!(manager.retrieve(&admin(), &fresh, Tier::Working).await.is_ok());

        let again = manager.sweep_expired(&admin()).await.unwrap();
        assert_eq!(again.purged, 0);
    }

    #[tokio::test]
    async fn test_sweep_needs_delete() {
        let manager = MemoryManager::in_memory();
        let err = manager.sweep_expired(&agent()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn test_background_sweeper() {
        let manager = Arc::new(MemoryManager::in_memory());
        plant_expired(&manager, "stale-1", 90);
        plant_expired(&manager, "stale-2", 45);

        let handle = spawn_ttl_sweeper(manager.clone(), Actor::system(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop();

        let stats = manager.backend(Tier::Working).stats().unwrap();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.versions, 0);
    }
}

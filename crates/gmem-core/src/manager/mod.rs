//! Memory Manager
//!
//! The single entry point every caller goes through. Each public operation
//! validates its input, asks the access policy for a decision, writes exactly
//! one audit entry with the final decision, and only then touches a tier
//! backend for the operation itself. Metadata lookups needed to reach a
//! decision (an entity's sensitivity, a relationship's endpoints) happen
//! after the tier-level check and before the audit entry.

mod graph_ops;
mod search;
mod sweeper;

pub use graph_ops::NewRelationship;
pub use search::{SearchFilter, SearchHit, SearchResults};
pub use sweeper::{spawn_ttl_sweeper, SweepReport, SweeperHandle};

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::access::{AccessDecision, AccessPolicy, DenyReason};
use crate::audit::{AuditDecision, AuditLogger, AuditQuery, AuditRecord, AuditSink};
use crate::backend::{DecodeError, StoredRecord, TierBackend, TierBackends, TierStats};
use crate::config::{ConfigValidationError, MemoryConfig};
use crate::embeddings::{Embedder, EmbeddingPipeline};
use crate::entity::{
    EntityPayload, MemoryEntity, NewEntity, RetrieveOptions, RetrievedEntity, VersionInfo,
};
use crate::error::{ErrorContext, ErrorKind, MemoryError, MemoryResult, StorageResult};
use crate::graph::GraphIndex;
use crate::types::{Actor, Operation, Permission, Sensitivity, Tier};

/// Counters across every tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub tiers: BTreeMap<Tier, TierStats>,
    pub audit_records: u64,
    pub indexed_edges: usize,
}

/// Builder for `MemoryManager`
#[derive(Default)]
pub struct MemoryManagerBuilder {
    config: MemoryConfig,
    policy: Option<AccessPolicy>,
    backends: Option<TierBackends>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl MemoryManagerBuilder {
    pub fn config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this policy instead of the one in the config
    pub fn policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn backends(mut self, backends: TierBackends) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Validate the configuration and assemble the manager. In-memory
    /// backends and audit sink are used for anything not supplied.
    pub fn build(self) -> Result<MemoryManager, ConfigValidationError> {
        self.config.validate()?;
        let policy = match self.policy {
            Some(policy) => policy,
            None => self.config.access_policy()?,
        };
        let audit = match self.audit_sink {
            Some(sink) => AuditLogger::new(sink),
            None => AuditLogger::in_memory(),
        };
        Ok(MemoryManager::assemble(
            self.config,
            policy,
            self.backends.unwrap_or_else(TierBackends::in_memory),
            audit,
            self.embedder,
        ))
    }
}

/// Governed multi-tier memory
pub struct MemoryManager {
    config: MemoryConfig,
    policy: AccessPolicy,
    audit: AuditLogger,
    backends: TierBackends,
    embeddings: EmbeddingPipeline,
    graph: RwLock<GraphIndex>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("config", &self.config)
            .field("embeddings", &self.embeddings)
            .finish_non_exhaustive()
    }
}

impl MemoryManager {
    pub fn builder() -> MemoryManagerBuilder {
        MemoryManagerBuilder::default()
    }

    /// Default policy and config over in-memory engines
    pub fn in_memory() -> Self {
        Self::assemble(
            MemoryConfig::default(),
            AccessPolicy::default_policy(),
            TierBackends::in_memory(),
            AuditLogger::in_memory(),
            None,
        )
    }

    fn assemble(
        config: MemoryConfig,
        policy: AccessPolicy,
        backends: TierBackends,
        audit: AuditLogger,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let embeddings = EmbeddingPipeline::new(
            embedder,
            config.embedding.dimensions,
            config.embedding_timeout(),
        );
        Self {
            config,
            policy,
            audit,
            backends,
            embeddings,
            graph: RwLock::new(GraphIndex::new()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn audit_logger(&self) -> &AuditLogger {
        &self.audit
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decision and audit plumbing
    // ─────────────────────────────────────────────────────────────────────────

    /// Audit an allowed decision. A sink failure refuses mutations and is
    /// tolerated for reads.
    async fn record_allowed(&self, actor: &Actor, ctx: &ErrorContext) -> MemoryResult<()> {
        let result = self
            .audit
            .record(
                actor,
                ctx.operation,
                ctx.tier,
                ctx.entity_id.as_deref(),
                AuditDecision::Allowed,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if ctx.operation.is_mutation() => {
                error!(
                    operation = %ctx.operation,
                    actor = %actor.id,
                    error = %e,
                    "Audit sink failed, refusing mutation"
                );
                Err(MemoryError::unavailable(
                    ctx.clone(),
                    format!("audit sink failed: {}", e),
                ))
            }
            Err(e) => {
                warn!(
                    operation = %ctx.operation,
                    actor = %actor.id,
                    error = %e,
                    "Audit sink failed, serving read without audit entry"
                );
                Ok(())
            }
        }
    }

    /// Audit a refusal. The refusal itself is what the caller gets back.
    async fn record_refusal(&self, actor: &Actor, ctx: &ErrorContext, decision: AuditDecision) {
        let result = self
            .audit
            .record(actor, ctx.operation, ctx.tier, ctx.entity_id.as_deref(), decision)
            .await;
        if let Err(e) = result {
            if ctx.operation.is_mutation() {
                error!(operation = %ctx.operation, error = %e, "Audit sink failed recording refusal");
            } else {
                warn!(operation = %ctx.operation, error = %e, "Audit sink failed recording refusal");
            }
        }
    }

    async fn reject(&self, actor: &Actor, ctx: ErrorContext, message: impl Into<String>) -> MemoryError {
        let message = message.into();
        debug!(operation = %ctx.operation, message = %message, "Request rejected");
        self.record_refusal(actor, &ctx, AuditDecision::rejected(message.clone()))
            .await;
        MemoryError::validation(ctx, message)
    }

    async fn deny(&self, actor: &Actor, ctx: ErrorContext, reason: DenyReason) -> MemoryError {
        warn!(
            actor = %actor.id,
            role = %actor.role,
            operation = %ctx.operation,
            tier = ?ctx.tier,
            entity_id = ?ctx.entity_id,
            reason = %reason,
            "Access denied"
        );
        self.record_refusal(actor, &ctx, AuditDecision::denied(reason.to_string()))
            .await;
        MemoryError::access_denied(ctx, reason.to_string())
    }

    /// Audit the allowed decision, then surface an error found while serving it
    async fn allowed_then<T>(
        &self,
        actor: &Actor,
        ctx: &ErrorContext,
        err: MemoryError,
    ) -> MemoryResult<T> {
        self.record_allowed(actor, ctx).await?;
        Err(err)
    }

    /// Check `permissions` on `tier` before any entity is looked at
    async fn authorize_tier(
        &self,
        actor: &Actor,
        ctx: &ErrorContext,
        tier: Tier,
        permissions: &[Permission],
    ) -> MemoryResult<()> {
        for &permission in permissions {
            if let AccessDecision::Deny(reason) =
                self.policy
                    .authorize(&actor.role, tier, permission, Sensitivity::Public)
            {
                return Err(self.deny(actor, ctx.clone(), reason).await);
            }
        }
        Ok(())
    }

    /// Tier check, latest-version lookup, then the sensitivity check against
    /// the stored entity. Lookup failures are audited as allowed decisions.
    async fn authorize_existing(
        &self,
        actor: &Actor,
        ctx: &ErrorContext,
        tier: Tier,
        id: &str,
        permissions: &[Permission],
        include_tombstoned: bool,
    ) -> MemoryResult<StoredRecord> {
        self.authorize_tier(actor, ctx, tier, permissions).await?;

        let latest = match self.latest(tier, id, ctx, include_tombstoned).await {
            Ok(record) => record,
            Err(err) => return self.allowed_then(actor, ctx, err).await,
        };

        for &permission in permissions {
            if let AccessDecision::Deny(reason) =
                self.policy
                    .authorize(&actor.role, tier, permission, latest.sensitivity)
            {
                return Err(self.deny(actor, ctx.clone(), reason).await);
            }
        }
        Ok(latest)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Backend access
    // ─────────────────────────────────────────────────────────────────────────

    fn backend(&self, tier: Tier) -> &Arc<dyn TierBackend> {
        self.backends.get(tier)
    }

    /// Run a backend read, retrying unavailable backends with exponential
    /// backoff
    async fn read_with_retry<T>(
        &self,
        ctx: &ErrorContext,
        mut read: impl FnMut() -> StorageResult<T>,
    ) -> MemoryResult<T> {
        let retries = if ctx.operation.is_mutation() {
            0
        } else {
            self.config.backend.read_retries
        };
        let mut attempt = 0u32;
        loop {
            let err = match read() {
                Ok(value) => return Ok(value),
                Err(e) => MemoryError::from_storage(ctx.clone(), e),
            };
            if err.kind() != ErrorKind::BackendUnavailable || attempt >= retries {
                return Err(err);
            }
            let backoff = self
                .config
                .backend
                .retry_backoff_ms
                .saturating_mul(1u64 << attempt.min(16));
            debug!(
                operation = %ctx.operation,
                attempt = attempt + 1,
                backoff_ms = backoff,
                error = %err,
                "Retrying backend read"
            );
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            attempt += 1;
        }
    }

    /// Latest version, hiding tombstoned and expired entries unless asked
    async fn latest(
        &self,
        tier: Tier,
        id: &str,
        ctx: &ErrorContext,
        include_tombstoned: bool,
    ) -> MemoryResult<StoredRecord> {
        let backend = self.backend(tier);
        let latest = self
            .read_with_retry(ctx, || backend.get(id, None))
            .await?;

        if latest.is_tombstone() {
            if include_tombstoned {
                return Ok(latest);
            }
            return Err(MemoryError::not_found(ctx.clone()));
        }
        if tier == Tier::Working && self.decode(&latest, ctx)?.is_expired_at(Utc::now()) {
            return Err(MemoryError::not_found(ctx.clone()));
        }
        Ok(latest)
    }

    /// Verify the checksum and rebuild the entity
    fn decode(&self, record: &StoredRecord, ctx: &ErrorContext) -> MemoryResult<MemoryEntity> {
        record.decode().map_err(|e| match e {
            DecodeError::Tombstoned => MemoryError::not_found(ctx.clone()),
            other => {
                error!(
                    tier = %record.tier,
                    entity_id = %record.id,
                    version = record.version,
                    error = %other,
                    "Integrity failure"
                );
                MemoryError::integrity(ctx.clone(), other.to_string())
            }
        })
    }

    fn persist(&self, entity: &MemoryEntity, ctx: &ErrorContext) -> MemoryResult<()> {
        let record = StoredRecord::from_entity(entity)
            .map_err(|e| MemoryError::integrity(ctx.clone(), e.to_string()))?;
        self.backend(entity.tier())
            .put(record)
            .map_err(|e| MemoryError::from_storage(ctx.clone(), e))
    }

    /// Fill in the vector of a semantic payload
    async fn embed_payload(
        &self,
        payload: &mut EntityPayload,
        require_real: bool,
        ctx: &ErrorContext,
    ) -> MemoryResult<()> {
        if let EntityPayload::Semantic(knowledge) = payload {
            let require_real = require_real || self.config.embedding.require_real;
            let embedding = self
                .embeddings
                .embed(&knowledge.content, require_real)
                .await
                .map_err(|e| MemoryError::unavailable(ctx.clone(), e.to_string()))?;
            knowledge.vector = embedding.vector;
            knowledge.vector_source = Some(embedding.source);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entity operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate, authorize a Write on the entity's tier, and persist version 1.
    /// Returns the new id.
    pub async fn store(&self, actor: &Actor, new: NewEntity) -> MemoryResult<String> {
        let tier = new.tier();
        let id = Uuid::new_v4().to_string();
        let ctx = ErrorContext::new(Operation::Store, Some(tier), Some(&id));

        if let Err(e) = new.payload.validate() {
            return Err(self.reject(actor, ctx, e.to_string()).await);
        }
        if tier == Tier::Graph {
            return Err(self
                .reject(actor, ctx, "relationships are created with create_relationship")
                .await);
        }
        if let AccessDecision::Deny(reason) =
            self.policy
                .authorize(&actor.role, tier, Permission::Write, new.sensitivity)
        {
            return Err(self.deny(actor, ctx, reason).await);
        }
        self.record_allowed(actor, &ctx).await?;

        let mut payload = new.payload;
        self.embed_payload(&mut payload, new.require_real_embedding, &ctx)
            .await?;

        let checksum = payload.checksum().map_err(|e| {
            MemoryError::integrity(ctx.clone(), format!("checksum computation failed: {}", e))
        })?;
        let now = Utc::now();
        let entity = MemoryEntity {
            id: id.clone(),
            owner: new.owner.unwrap_or_else(|| actor.id.clone()),
            sensitivity: new.sensitivity,
            created_at: now,
            updated_at: now,
            version: 1,
            checksum,
            payload,
        };
        self.persist(&entity, &ctx)?;

        debug!(tier = %tier, entity_id = %id, actor = %actor.id, "Stored entity");
        Ok(id)
    }

    /// Latest live version of an entity
    pub async fn retrieve(&self, actor: &Actor, id: &str, tier: Tier) -> MemoryResult<MemoryEntity> {
        self.retrieve_with(actor, id, tier, RetrieveOptions::default())
            .await
            .map(|r| r.entity)
    }

    /// A specific version, superseded ones included
    pub async fn retrieve_version(
        &self,
        actor: &Actor,
        id: &str,
        tier: Tier,
        version: u64,
    ) -> MemoryResult<MemoryEntity> {
        let options = RetrieveOptions {
            version: Some(version),
            ..Default::default()
        };
        self.retrieve_with(actor, id, tier, options)
            .await
            .map(|r| r.entity)
    }

    /// Read with options. `include_tombstoned` is the administrative path
    /// and needs Delete as well as Read on the tier; it returns the last
    /// payload version together with the tombstone marker.
    pub async fn retrieve_with(
        &self,
        actor: &Actor,
        id: &str,
        tier: Tier,
        options: RetrieveOptions,
    ) -> MemoryResult<RetrievedEntity> {
        let ctx = ErrorContext::new(Operation::Retrieve, Some(tier), Some(id));
        if id.trim().is_empty() {
            return Err(self.reject(actor, ctx, "id must not be empty").await);
        }

        let permissions: &[Permission] = if options.include_tombstoned {
            &[Permission::Read, Permission::Delete]
        } else {
            &[Permission::Read]
        };
        let latest = self
            .authorize_existing(actor, &ctx, tier, id, permissions, options.include_tombstoned)
            .await?;
        self.record_allowed(actor, &ctx).await?;

        let tombstone = latest.tombstone();
        let backend = self.backend(tier);
        let record = match (options.version, &tombstone) {
            (Some(version), _) if version == latest.version => latest,
            (Some(version), _) => {
                self.read_with_retry(&ctx, || backend.get(id, Some(version)))
                    .await?
            }
            (None, Some(_)) => self
                .read_with_retry(&ctx, || backend.versions(id))
                .await?
                .into_iter()
                .rev()
                .find(|r| !r.is_tombstone())
                .ok_or_else(|| MemoryError::not_found(ctx.clone()))?,
            (None, None) => latest,
        };

        let entity = self.decode(&record, &ctx)?;
        Ok(RetrievedEntity { entity, tombstone })
    }

    /// Every version of an entity, oldest first, tombstones included
    pub async fn history(&self, actor: &Actor, id: &str, tier: Tier) -> MemoryResult<Vec<VersionInfo>> {
        let ctx = ErrorContext::new(Operation::History, Some(tier), Some(id));
        if id.trim().is_empty() {
            return Err(self.reject(actor, ctx, "id must not be empty").await);
        }

        self.authorize_existing(actor, &ctx, tier, id, &[Permission::Read], true)
            .await?;
        self.record_allowed(actor, &ctx).await?;

        let backend = self.backend(tier);
        let versions = self.read_with_retry(&ctx, || backend.versions(id)).await?;
        Ok(versions
            .iter()
            .map(|r| VersionInfo {
                version: r.version,
                checksum: r.checksum().map(String::from),
                written_at: r.written_at,
                tombstoned: r.is_tombstone(),
            })
            .collect())
    }

    /// Write a new version after `expected_version`. Fails with `Conflict`
    /// when another writer got there first.
    pub async fn append_version(
        &self,
        actor: &Actor,
        id: &str,
        tier: Tier,
        expected_version: u64,
        payload: EntityPayload,
    ) -> MemoryResult<u64> {
        let ctx = ErrorContext::new(Operation::AppendVersion, Some(tier), Some(id));
        if id.trim().is_empty() {
            return Err(self.reject(actor, ctx, "id must not be empty").await);
        }
        if !tier.is_versioned() {
            return Err(self.reject(actor, ctx, "working entries are not versioned").await);
        }
        if payload.tier() != tier {
            let message = format!("{} payload cannot be appended to {}", payload.tier(), tier);
            return Err(self.reject(actor, ctx, message).await);
        }
        if let Err(e) = payload.validate() {
            return Err(self.reject(actor, ctx, e.to_string()).await);
        }

        let latest = self
            .authorize_existing(actor, &ctx, tier, id, &[Permission::Write], false)
            .await?;
        if latest.version != expected_version {
            let conflict = MemoryError::Conflict {
                context: ctx.clone(),
                expected: expected_version,
                actual: latest.version,
            };
            return self.allowed_then(actor, &ctx, conflict).await;
        }
        let previous = match self.decode(&latest, &ctx) {
            Ok(entity) => entity,
            Err(err) => return self.allowed_then(actor, &ctx, err).await,
        };

        let mut payload = payload;
        match (&previous.payload, &mut payload) {
            (EntityPayload::Episodic(before), EntityPayload::Episodic(after)) => {
                if !after.extends(before) {
                    return Err(self
                        .reject(
                            actor,
                            ctx,
                            "new version must keep the previous steps and workflow id",
                        )
                        .await);
                }
            }
            (EntityPayload::Graph(before), EntityPayload::Graph(after)) => {
                if before.from_id != after.from_id || before.to_id != after.to_id {
                    return Err(self
                        .reject(actor, ctx, "relationship endpoints cannot change")
                        .await);
                }
                after.from_tier = before.from_tier;
                after.to_tier = before.to_tier;
            }
            _ => {}
        }
        self.record_allowed(actor, &ctx).await?;

        self.embed_payload(&mut payload, false, &ctx).await?;
        let checksum = payload.checksum().map_err(|e| {
            MemoryError::integrity(ctx.clone(), format!("checksum computation failed: {}", e))
        })?;
        let entity = MemoryEntity {
            id: id.to_string(),
            owner: previous.owner,
            sensitivity: previous.sensitivity,
            created_at: previous.created_at,
            updated_at: Utc::now(),
            version: expected_version + 1,
            checksum,
            payload,
        };
        self.persist(&entity, &ctx)?;

        if tier == Tier::Graph {
            self.reindex_edge(&entity, &ctx)?;
        }

        debug!(tier = %tier, entity_id = %id, version = entity.version, "Appended version");
        Ok(entity.version)
    }

    /// Logical delete: appends a tombstone version
    pub async fn delete(&self, actor: &Actor, id: &str, tier: Tier) -> MemoryResult<()> {
        let ctx = ErrorContext::new(Operation::Delete, Some(tier), Some(id));
        if id.trim().is_empty() {
            return Err(self.reject(actor, ctx, "id must not be empty").await);
        }

        let latest = self
            .authorize_existing(actor, &ctx, tier, id, &[Permission::Delete], false)
            .await?;
        self.record_allowed(actor, &ctx).await?;

        self.backend(tier)
            .tombstone(id, latest.version, &actor.id, Utc::now())
            .map_err(|e| MemoryError::from_storage(ctx.clone(), e))?;

        if tier == Tier::Graph {
            self.unindex_edge(id, &ctx)?;
        }

        info!(tier = %tier, entity_id = %id, actor = %actor.id, "Entity tombstoned");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    /// Read the audit trail; needs Read on every tier
    pub async fn audit_trail(&self, actor: &Actor, query: &AuditQuery) -> MemoryResult<Vec<AuditRecord>> {
        let ctx = ErrorContext::new(Operation::AuditQuery, None, None);
        for tier in Tier::ALL {
            self.authorize_tier(actor, &ctx, tier, &[Permission::Read])
                .await?;
        }
        self.record_allowed(actor, &ctx).await?;

        self.audit
            .query(query)
            .await
            .map_err(|e| MemoryError::from_storage(ctx, e))
    }

    /// Per-tier counters; needs Read on every tier
    pub async fn stats(&self, actor: &Actor) -> MemoryResult<MemoryStats> {
        let ctx = ErrorContext::new(Operation::Stats, None, None);
        for tier in Tier::ALL {
            self.authorize_tier(actor, &ctx, tier, &[Permission::Read])
                .await?;
        }
        self.record_allowed(actor, &ctx).await?;

        let mut tiers = BTreeMap::new();
        for tier in Tier::ALL {
            let backend = self.backend(tier);
            let stats = self.read_with_retry(&ctx, || backend.stats()).await?;
            tiers.insert(tier, stats);
        }
        let audit_records = self
            .audit
            .len()
            .await
            .map_err(|e| MemoryError::from_storage(ctx.clone(), e))?;
        self.refresh_graph_index(&ctx).await?;
        let indexed_edges = self
            .graph
            .read()
            .map(|index| index.len())
            .map_err(|_| MemoryError::unavailable(ctx, "graph index lock poisoned"))?;

        Ok(MemoryStats {
            tiers,
            audit_records,
            indexed_edges,
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::test_support::*;
    use super::*;
    use crate::entity::{EpisodicRecord, StepEvent, WorkflowStatus};

    fn step(sequence: u32, name: &str) -> StepEvent {
        StepEvent {
            sequence,
            name: name.into(),
            agent: Some("analyst".into()),
            data: json!({ "score": sequence as f64 * 0.25 }),
            recorded_at: Utc::now(),
        }
    }

    fn workflow(steps: Vec<StepEvent>, status: WorkflowStatus) -> EpisodicRecord {
        EpisodicRecord {
            workflow_id: "wf-renewal-7".into(),
            steps,
            inputs: json!({ "account": "acme", "arr": 120000.5 }),
            outputs: json!({}),
            status,
        }
    }

    #[tokio::test]
    async fn test_store_then_retrieve_verifies_checksum() {
        let manager = MemoryManager::in_memory();
        let entities = vec![
            NewEntity::working("session", json!({ "cursor": 3, "ratio": 0.1 }), 600),
            NewEntity::episodic(workflow(vec![step(1, "intake")], WorkflowStatus::Running)),
            NewEntity::semantic("Churn drops when onboarding is guided", "insight", "crm", 0.8),
        ];
        for new in entities {
            let tier = new.tier();
            let id = manager.store(&admin(), new.clone()).await.unwrap();
            let entity = manager.retrieve(&admin(), &id, tier).await.unwrap();
            assert_eq!(entity.payload.checksum().unwrap(), entity.checksum);
            assert_eq!(entity.version, 1);
            assert_eq!(entity.owner, "admin-1");
            if tier != Tier::Semantic {
                assert_eq!(entity.payload, new.payload);
            }
        }
    }

    #[tokio::test]
    async fn test_every_call_writes_one_audit_entry() {
        let manager = MemoryManager::in_memory();
        let id = manager
            .store(&admin(), NewEntity::semantic("fact", "note", "crm", 0.5))
            .await
            .unwrap();
        assert_eq!(audit_len(&manager).await, 1);

        manager.retrieve(&agent(), &id, Tier::Semantic).await.unwrap();
        assert_eq!(audit_len(&manager).await, 2);

        // denied
        assert!(manager.retrieve(&agent(), &id, Tier::Episodic).await.is_err());
        assert_eq!(audit_len(&manager).await, 3);

        // rejected by validation
        let bad = NewEntity::semantic("", "note", "crm", 0.5);
        assert!(manager.store(&admin(), bad).await.is_err());
        assert_eq!(audit_len(&manager).await, 4);

        // not found
        assert!(manager.retrieve(&admin(), "missing", Tier::Semantic).await.is_err());
        assert_eq!(audit_len(&manager).await, 5);

        manager.delete(&admin(), &id, Tier::Semantic).await.unwrap();
        assert_eq!(audit_len(&manager).await, 6);

        let trail = manager
            .audit_trail(&admin(), &AuditQuery::default())
            .await
            .unwrap();
        assert_eq!(trail.len(), 7);
        assert_eq!(trail[2].entry.decision.label(), "denied");
        assert_eq!(trail[3].entry.decision.label(), "rejected");
        assert!(crate::audit::verify_chain(&trail).valid);
    }

    #[tokio::test]
    async fn test_agent_denied_episodic_admin_reads_back() {
        let manager = MemoryManager::in_memory();
        let record = workflow(vec![step(1, "intake"), step(2, "score")], WorkflowStatus::Completed);
        let id = manager
            .store(&admin(), NewEntity::episodic(record.clone()))
            .await
            .unwrap();

        let err = manager.retrieve(&agent(), &id, Tier::Episodic).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        let entity = manager.retrieve(&admin(), &id, Tier::Episodic).await.unwrap();
        assert_eq!(entity.as_episodic(), Some(&record));
    }

    #[tokio::test]
    async fn test_agent_cannot_write_or_exceed_clearance() {
        let manager = MemoryManager::in_memory();
        let err = manager
            .store(&agent(), NewEntity::working("k", json!(1), 60))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        let secret = NewEntity::semantic("board minutes", "doc", "drive", 0.9)
            .with_sensitivity(Sensitivity::Confidential);
        let id = manager.store(&admin(), secret).await.unwrap();
        let err = manager.retrieve(&agent(), &id, Tier::Semantic).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        let restricted = NewEntity::semantic("payroll", "doc", "hr", 0.9)
            .with_sensitivity(Sensitivity::Restricted);
        let err = manager.store(&admin(), restricted).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn test_two_episodic_versions() {
        let manager = MemoryManager::in_memory();
        let v1 = workflow(vec![step(1, "intake")], WorkflowStatus::Running);
        let id = manager
            .store(&admin(), NewEntity::episodic(v1.clone()))
            .await
            .unwrap();

        let mut v2 = v1.clone();
        v2.steps.push(step(2, "score"));
        v2.status = WorkflowStatus::Completed;
        let version = manager
            .append_version(&admin(), &id, Tier::Episodic, 1, EntityPayload::Episodic(v2.clone()))
            .await
            .unwrap();
        assert_eq!(version, 2);

        let latest = manager.retrieve(&admin(), &id, Tier::Episodic).await.unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.as_episodic(), Some(&v2));

        let superseded = manager
            .retrieve_version(&admin(), &id, Tier::Episodic, 1)
            .await
            .unwrap();
        assert_eq!(superseded.as_episodic(), Some(&v1));

        let writes = manager
            .audit_trail(&admin(), &AuditQuery::for_entity(id.clone()))
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.entry.operation.is_mutation() && r.entry.decision.is_allowed())
            .count();
        assert_eq!(writes, 2);

        let history = manager.history(&admin(), &id, Tier::Episodic).await.unwrap();
        assert_eq!(history.iter().map(|h| h.version).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_episodic_rewrite_rejected() {
        let manager = MemoryManager::in_memory();
        let v1 = workflow(vec![step(1, "intake"), step(2, "score")], WorkflowStatus::Running);
        let id = manager
            .store(&admin(), NewEntity::episodic(v1.clone()))
            .await
            .unwrap();

        let mut rewritten = v1.clone();
        rewritten.steps.truncate(1);
        let err = manager
            .append_version(&admin(), &id, Tier::Episodic, 1, EntityPayload::Episodic(rewritten))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_working_entries_are_not_versioned() {
        let manager = MemoryManager::in_memory();
        let new = NewEntity::working("k", json!(1), 60);
        let id = manager.store(&admin(), new.clone()).await.unwrap();
        let err = manager
            .append_version(&admin(), &id, Tier::Working, 1, new.payload)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_concurrent_append_conflicts() {
        let manager = Arc::new(MemoryManager::in_memory());
        let id = manager
            .store(&admin(), NewEntity::semantic("v1", "note", "crm", 0.5))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let manager = manager.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let payload = NewEntity::semantic(format!("v2 from {}", i), "note", "crm", 0.5).payload;
                manager
                    .append_version(&admin(), &id, Tier::Semantic, 1, payload)
                    .await
            }));
        }
        let mut won = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(version) => {
                    assert_eq!(version, 2);
                    won += 1;
                }
                Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
            }
        }
        assert_eq!(won, 1);

        // stale writer retrying with the old version still conflicts
        let stale = NewEntity::semantic("late", "note", "crm", 0.5).payload;
        let err = manager
            .append_version(&admin(), &id, Tier::Semantic, 1, stale)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_delete_then_retrieve() {
        let manager = MemoryManager::in_memory();
        let id = manager
            .store(&admin(), NewEntity::semantic("obsolete pricing", "note", "crm", 0.4))
            .await
            .unwrap();
        manager.delete(&admin(), &id, Tier::Semantic).await.unwrap();

        let err = manager.retrieve(&admin(), &id, Tier::Semantic).await.unwrap_err();
        assert!(err.is_not_found());

        let options = RetrieveOptions {
            include_tombstoned: true,
            ..Default::default()
        };
        let found = manager
            .retrieve_with(&admin(), &id, Tier::Semantic, options)
            .await
            .unwrap();
        assert_eq!(found.entity.version, 1);
        let tombstone = found.tombstone.unwrap();
        assert_eq!(tombstone.deleted_by, "admin-1");
        assert_eq!(tombstone.version, 2);

        // the administrative path needs Delete too
        let err = manager
            .retrieve_with(&agent(), &id, Tier::Semantic, options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        // deleting twice finds nothing to delete
        let err = manager.delete(&admin(), &id, Tier::Semantic).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_integrity_error() {
        let faulty = Arc::new(FaultyBackend::new(Tier::Episodic));
        let manager = MemoryManager::builder()
            .backends(TierBackends::in_memory().with(faulty.clone()))
            .build()
            .unwrap();
        let id = manager
            .store(&admin(), NewEntity::episodic(workflow(vec![], WorkflowStatus::Pending)))
            .await
            .unwrap();

        faulty.corrupt.store(true, Ordering::SeqCst);
        let err = manager.retrieve(&admin(), &id, Tier::Episodic).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_reads_retry_unavailable_backend() {
        let faulty = Arc::new(FaultyBackend::new(Tier::Semantic));
        let mut config = MemoryConfig::default();
        config.backend.retry_backoff_ms = 1;
        let manager = MemoryManager::builder()
            .config(config)
            .backends(TierBackends::in_memory().with(faulty.clone()))
            .build()
            .unwrap();
        let id = manager
            .store(&admin(), NewEntity::semantic("fact", "note", "crm", 0.5))
            .await
            .unwrap();

        faulty.failing_reads.store(2, Ordering::SeqCst);
        assert!(manager.retrieve(&admin(), &id, Tier::Semantic).await.is_ok());

        faulty.failing_reads.store(3, Ordering::SeqCst);
        let err = manager.retrieve(&admin(), &id, Tier::Semantic).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn test_audit_failure_closes_writes_and_opens_reads() {
        let sink = Arc::new(SwitchableAuditSink::default());
        let manager = MemoryManager::builder()
            .audit_sink(sink.clone())
            .build()
            .unwrap();
        let id = manager
            .store(&admin(), NewEntity::semantic("fact", "note", "crm", 0.5))
            .await
            .unwrap();

        sink.down.store(true, Ordering::SeqCst);
        let err = manager
            .store(&admin(), NewEntity::semantic("another", "note", "crm", 0.5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        let err = manager.delete(&admin(), &id, Tier::Semantic).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);

        // nothing was written or tombstoned
        let stats = manager.backend(Tier::Semantic).stats().unwrap();
        assert_eq!(stats, TierStats { live: 1, tombstoned: 0, versions: 1 });

        // reads still work
        assert!(manager.retrieve(&admin(), &id, Tier::Semantic).await.is_ok());
    }

    #[tokio::test]
    async fn test_owner_override_and_stats() {
        let manager = MemoryManager::in_memory();
        let id = manager
            .store(
                &admin(),
                NewEntity::working("k", json!("v"), 60).with_owner("agent-9"),
            )
            .await
            .unwrap();
        let entity = manager.retrieve(&admin(), &id, Tier::Working).await.unwrap();
        assert_eq!(entity.owner, "agent-9");

        let stats = manager.stats(&admin()).await.unwrap();
        assert_eq!(stats.tiers[&Tier::Working].live, 1);
        assert_eq!(stats.tiers[&Tier::Graph].versions, 0);
        assert_eq!(stats.audit_records, 3);

        assert!(manager.stats(&agent()).await.is_err());
        assert!(manager.audit_trail(&agent(), &AuditQuery::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_count_edges_written_elsewhere() {
        let backends = TierBackends::in_memory();
        let writer = MemoryManager::builder().backends(backends.clone()).build().unwrap();
        let mut ids = Vec::new();
        for content in ["a", "b"] {
            let new = NewEntity::semantic(content, "concept", "wiki", 0.5);
            ids.push(writer.store(&admin(), new).await.unwrap());
        }
        writer
            .create_relationship(&admin(), NewRelationship::new(&ids[0], &ids[1], "supports", 0.4))
            .await
            .unwrap();

        let fresh = MemoryManager::builder().backends(backends).build().unwrap();
        let stats = fresh.stats(&admin()).await.unwrap();
        assert_eq!(stats.tiers[&Tier::Graph].live, 1);
        assert_eq!(stats.indexed_edges, 1);
    }

    #[tokio::test]
    async fn test_store_refuses_graph_payloads() {
        let manager = MemoryManager::in_memory();
        let payload = EntityPayload::Graph(crate::entity::GraphRelationship {
            from_id: "a".into(),
            to_id: "b".into(),
            from_tier: None,
            to_tier: None,
            relation_type: "supports".into(),
            strength: 0.5,
            bidirectional: false,
        });
        let err = manager.store(&admin(), NewEntity::new(payload)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

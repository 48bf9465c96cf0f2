//! Relationship creation and graph traversal.

use std::collections::HashMap;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::MemoryManager;
use crate::access::AccessDecision;
use crate::backend::ListFilter;
use crate::entity::{EntityPayload, GraphRelationship, MemoryEntity};
use crate::error::{ErrorContext, MemoryError, MemoryResult};
use crate::graph::{GraphIndex, GraphPath, IndexedEdge, Neighbor, NodeRef};
use crate::types::{Actor, Operation, Permission, Sensitivity, Tier};

/// Input for `create_relationship`
#[derive(Debug, Clone)]
pub struct NewRelationship {
    pub from_id: String,
    pub to_id: String,
    pub relation_type: String,
    /// Within [0, 1]
    pub strength: f64,
    pub bidirectional: bool,
    pub sensitivity: Sensitivity,
}

impl NewRelationship {
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        relation_type: impl Into<String>,
        strength: f64,
    ) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            relation_type: relation_type.into(),
            strength,
            bidirectional: false,
            sensitivity: Sensitivity::default(),
        }
    }

    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    fn relationship(&self) -> GraphRelationship {
        GraphRelationship {
            from_id: self.from_id.clone(),
            to_id: self.to_id.clone(),
            from_tier: None,
            to_tier: None,
            relation_type: self.relation_type.clone(),
            strength: self.strength,
            bidirectional: self.bidirectional,
        }
    }
}

/// Index entry for a stored relationship
fn indexed_edge(entity: &MemoryEntity) -> Result<IndexedEdge, String> {
    let Some(rel) = entity.as_relationship() else {
        return Err(format!("{} is not a relationship", entity.id));
    };
    let (Some(from_tier), Some(to_tier)) = (rel.from_tier, rel.to_tier) else {
        return Err(format!("relationship {} has unresolved endpoint tiers", entity.id));
    };
    Ok(IndexedEdge {
        edge_id: entity.id.clone(),
        from: NodeRef::new(rel.from_id.clone(), from_tier),
        to: NodeRef::new(rel.to_id.clone(), to_tier),
        relation_type: rel.relation_type.clone(),
        strength: rel.strength,
        bidirectional: rel.bidirectional,
        sensitivity: entity.sensitivity,
        version: entity.version,
    })
}

fn index_poisoned(ctx: &ErrorContext) -> MemoryError {
    MemoryError::unavailable(ctx.clone(), "graph index lock poisoned")
}

impl MemoryManager {
    /// Store a GRAPH-tier relationship between two existing entities.
    ///
    /// Both endpoints must be live in some tier; the tiers found are recorded
    /// on the edge. Returns the relationship id.
    pub async fn create_relationship(
        &self,
        actor: &Actor,
        new: NewRelationship,
    ) -> MemoryResult<String> {
        let id = Uuid::new_v4().to_string();
        let ctx = ErrorContext::new(Operation::CreateRelationship, Some(Tier::Graph), Some(&id));

        let mut relationship = new.relationship();
        if let Err(e) = EntityPayload::Graph(relationship.clone()).validate() {
            return Err(self.reject(actor, ctx, e.to_string()).await);
        }
        if let AccessDecision::Deny(reason) = self.policy.authorize(
            &actor.role,
            Tier::Graph,
            Permission::Write,
            new.sensitivity,
        ) {
            return Err(self.deny(actor, ctx, reason).await);
        }

        for (endpoint, slot) in [
            (&new.from_id, &mut relationship.from_tier),
            (&new.to_id, &mut relationship.to_tier),
        ] {
            match self.locate(endpoint, &ctx).await {
                Ok(Some(tier)) => *slot = Some(tier),
                Ok(None) => {
                    let message = format!("endpoint '{}' does not exist", endpoint);
                    return Err(self.reject(actor, ctx, message).await);
                }
                Err(err) => return self.allowed_then(actor, &ctx, err).await,
            }
        }
        self.record_allowed(actor, &ctx).await?;

        let payload = EntityPayload::Graph(relationship);
        let checksum = payload.checksum().map_err(|e| {
            MemoryError::integrity(ctx.clone(), format!("checksum computation failed: {}", e))
        })?;
        let now = Utc::now();
        let entity = MemoryEntity {
            id: id.clone(),
            owner: actor.id.clone(),
            sensitivity: new.sensitivity,
            created_at: now,
            updated_at: now,
            version: 1,
            checksum,
            payload,
        };
        self.persist(&entity, &ctx)?;
        self.reindex_edge(&entity, &ctx)?;

        debug!(
            edge_id = %id,
            from = %new.from_id,
            to = %new.to_id,
            relation = %new.relation_type,
            "Created relationship"
        );
        Ok(id)
    }

    /// Simple paths from `start` to `end` of at most `max_depth` edges,
    /// shortest first and strongest first within a length. Edges the actor
    /// may not see are never walked.
    pub async fn find_paths(
        &self,
        actor: &Actor,
        start: &str,
        end: &str,
        max_depth: usize,
    ) -> MemoryResult<Vec<GraphPath>> {
        let ctx = ErrorContext::new(Operation::FindPaths, Some(Tier::Graph), Some(start));
        if start.trim().is_empty() || end.trim().is_empty() {
            return Err(self.reject(actor, ctx, "path endpoints must not be empty").await);
        }
        let limit = self.config.graph.max_depth_limit;
        if max_depth > limit {
            let message = format!("max_depth {} exceeds the limit of {}", max_depth, limit);
            return Err(self.reject(actor, ctx, message).await);
        }
        self.authorize_tier(actor, &ctx, Tier::Graph, &[Permission::Read])
            .await?;
        self.record_allowed(actor, &ctx).await?;

        self.refresh_graph_index(&ctx).await?;
        let index = self.read_index(&ctx)?;
        Ok(index.find_paths(start, end, max_depth, |edge| {
            self.policy
                .can_see(&actor.role, Tier::Graph, edge.sensitivity)
        }))
    }

    /// Every visible edge touching `node`
    pub async fn neighbors(&self, actor: &Actor, node: &str) -> MemoryResult<Vec<Neighbor>> {
        let ctx = ErrorContext::new(Operation::Neighbors, Some(Tier::Graph), Some(node));
        if node.trim().is_empty() {
            return Err(self.reject(actor, ctx, "node id must not be empty").await);
        }
        self.authorize_tier(actor, &ctx, Tier::Graph, &[Permission::Read])
            .await?;
        self.record_allowed(actor, &ctx).await?;

        self.refresh_graph_index(&ctx).await?;
        let index = self.read_index(&ctx)?;
        Ok(index.neighbors(node, |edge| {
            self.policy
                .can_see(&actor.role, Tier::Graph, edge.sensitivity)
        }))
    }

    /// Tier holding a live entity with this id. Tombstoned and expired
    /// entries do not count, matching what `retrieve` can see.
    async fn locate(&self, id: &str, ctx: &ErrorContext) -> MemoryResult<Option<Tier>> {
        for tier in Tier::ALL {
            match self.latest(tier, id, ctx, false).await {
                Ok(_) => return Ok(Some(tier)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn read_index(&self, ctx: &ErrorContext) -> MemoryResult<RwLockReadGuard<'_, GraphIndex>> {
        self.graph.read().map_err(|_| index_poisoned(ctx))
    }

    fn write_index(&self, ctx: &ErrorContext) -> MemoryResult<RwLockWriteGuard<'_, GraphIndex>> {
        self.graph.write().map_err(|_| index_poisoned(ctx))
    }

    /// Put the latest version of a relationship into the index
    pub(super) fn reindex_edge(&self, entity: &MemoryEntity, ctx: &ErrorContext) -> MemoryResult<()> {
        let edge = indexed_edge(entity).map_err(|m| MemoryError::integrity(ctx.clone(), m))?;
        let mut index = self.write_index(ctx)?;
        index.remove(&edge.edge_id);
        index.insert(edge);
        Ok(())
    }

    pub(super) fn unindex_edge(&self, edge_id: &str, ctx: &ErrorContext) -> MemoryResult<()> {
        self.write_index(ctx)?.remove(edge_id);
        Ok(())
    }

    /// Rebuild the index from the GRAPH backend when it has drifted: an edge
    /// was added, deleted or given a new version by another manager, or this
    /// one just started.
    pub(super) async fn refresh_graph_index(&self, ctx: &ErrorContext) -> MemoryResult<()> {
        let backend = self.backend(Tier::Graph);
        let ids = self
            .read_with_retry(ctx, || backend.list(&ListFilter::live()))
            .await?;

        let mut latest = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.read_with_retry(ctx, || backend.get(id, None)).await {
                Ok(record) if !record.is_tombstone() => latest.push(record),
                Ok(_) => continue,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        let versions: HashMap<String, u64> = latest
            .iter()
            .map(|record| (record.id.clone(), record.version))
            .collect();
        let current = self.read_index(ctx)?.matches_versions(&versions);
        if current {
            return Ok(());
        }

        let mut edges = Vec::with_capacity(latest.len());
        for record in &latest {
            let entity = self.decode(record, ctx)?;
            let edge = indexed_edge(&entity).map_err(|m| {
                error!(edge_id = %record.id, error = %m, "Unindexable relationship");
                MemoryError::integrity(ctx.clone(), m)
            })?;
            edges.push(edge);
        }

        let rebuilt = GraphIndex::from_edges(edges);
        info!(edges = rebuilt.len(), "Rebuilt graph index");
        *self.write_index(ctx)? = rebuilt;
        Ok(())
    }
}

//! Metadata and similarity search within one tier.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::MemoryManager;
use crate::backend::ListFilter;
use crate::embeddings::cosine_similarity;
use crate::entity::{EntityPayload, MemoryEntity, VectorSource};
use crate::error::{ErrorContext, MemoryResult};
use crate::types::{Actor, Operation, Permission, Tier};

/// Search criteria. Field filters are exact matches on top-level payload
/// fields, or on `owner` and `sensitivity`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub fields: BTreeMap<String, Value>,
    /// Rank semantic entities by similarity to this text
    pub similar_to: Option<String>,
    /// Defaults to `search.default_top_k` for similarity queries
    pub top_k: Option<usize>,
    /// Defaults to `search.min_similarity`
    pub min_score: Option<f32>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn similar(mut self, text: impl Into<String>) -> Self {
        self.similar_to = Some(text.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    fn check(&self, tier: Tier) -> Result<(), String> {
        if self.top_k == Some(0) {
            return Err("top_k must be greater than 0".into());
        }
        if let Some(text) = &self.similar_to {
            if tier != Tier::Semantic {
                return Err(format!("similarity search is not supported on {}", tier));
            }
            if text.trim().is_empty() {
                return Err("similarity query must not be empty".into());
            }
        }
        if let Some(score) = self.min_score {
            if !(-1.0..=1.0).contains(&score) {
                return Err("min_score must be within [-1, 1]".into());
            }
        }
        if self.fields.keys().any(|name| name.trim().is_empty()) {
            return Err("filter field names must not be empty".into());
        }
        Ok(())
    }

    fn matches(&self, entity: &MemoryEntity) -> bool {
        self.fields.iter().all(|(name, expected)| {
            let actual = match name.as_str() {
                "owner" => Some(Value::String(entity.owner.clone())),
                "sensitivity" => Some(Value::String(entity.sensitivity.as_str().to_string())),
                _ => entity.payload.field(name),
            };
            actual.as_ref() == Some(expected)
        })
    }
}

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub entity: MemoryEntity,
    /// Cosine similarity, for similarity queries
    pub score: Option<f32>,
}

/// Materialized results; iterate as often as needed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    hits: Vec<SearchHit>,
}

impl SearchResults {
    pub fn iter(&self) -> std::slice::Iter<'_, SearchHit> {
        self.hits.iter()
    }

    pub fn entities(&self) -> impl Iterator<Item = &MemoryEntity> {
        self.hits.iter().map(|h| &h.entity)
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn into_hits(self) -> Vec<SearchHit> {
        self.hits
    }
}

impl<'a> IntoIterator for &'a SearchResults {
    type Item = &'a SearchHit;
    type IntoIter = std::slice::Iter<'a, SearchHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}

impl IntoIterator for SearchResults {
    type Item = SearchHit;
    type IntoIter = std::vec::IntoIter<SearchHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}

/// Query vectors. Stored vectors are only compared with a query vector from
/// the same source.
struct QueryVectors {
    model: Option<Vec<f32>>,
    fallback: Vec<f32>,
}

impl MemoryManager {
    /// Live entities of `tier` matching `filter` that the actor may see.
    ///
    /// Entities above the actor's clearance are skipped rather than failing
    /// the search. Similarity queries come back best first, ties broken by
    /// creation time and then id; other queries keep insertion order.
    pub async fn search(
        &self,
        actor: &Actor,
        tier: Tier,
        filter: SearchFilter,
    ) -> MemoryResult<SearchResults> {
        let ctx = ErrorContext::new(Operation::Search, Some(tier), None);
        if let Err(message) = filter.check(tier) {
            return Err(self.reject(actor, ctx, message).await);
        }
        self.authorize_tier(actor, &ctx, tier, &[Permission::Read])
            .await?;
        self.record_allowed(actor, &ctx).await?;

        let query = match &filter.similar_to {
            Some(text) => Some(self.query_vectors(text).await),
            None => None,
        };

        let backend = self.backend(tier);
        let ids = self
            .read_with_retry(&ctx, || backend.list(&ListFilter::live()))
            .await?;
        let now = Utc::now();

        let mut hits = Vec::new();
        for id in ids {
            let record = match self.read_with_retry(&ctx, || backend.get(&id, None)).await {
                Ok(record) => record,
                // purged or tombstoned since the listing
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if record.is_tombstone() || !self.policy.can_see(&actor.role, tier, record.sensitivity) {
                continue;
            }
            let entity = self.decode(&record, &ctx)?;
            if entity.is_expired_at(now) || !filter.matches(&entity) {
                continue;
            }
            let score = query.as_ref().map(|q| self.score(&entity, q));
            hits.push(SearchHit { entity, score });
        }

        if query.is_some() {
            let min_score = filter.min_score.or(self.config.search.min_similarity);
            if let Some(min) = min_score {
                hits.retain(|h| h.score.is_some_and(|s| s >= min));
            }
            hits.sort_by(|a, b| {
                let (sa, sb) = (a.score.unwrap_or(f32::MIN), b.score.unwrap_or(f32::MIN));
                sb.total_cmp(&sa)
                    .then_with(|| a.entity.created_at.cmp(&b.entity.created_at))
                    .then_with(|| a.entity.id.cmp(&b.entity.id))
            });
            hits.truncate(filter.top_k.unwrap_or(self.config.search.default_top_k));
        } else if let Some(top_k) = filter.top_k {
            hits.truncate(top_k);
        }

        debug!(tier = %tier, hits = hits.len(), "Search complete");
        Ok(SearchResults { hits })
    }

    async fn query_vectors(&self, text: &str) -> QueryVectors {
        let model = match self.embeddings.embed(text, false).await {
            Ok(embedding) if embedding.source == VectorSource::Model => Some(embedding.vector),
            _ => None,
        };
        QueryVectors {
            model,
            fallback: self.embeddings.fallback_vector(text),
        }
    }

    fn score(&self, entity: &MemoryEntity, query: &QueryVectors) -> f32 {
        let EntityPayload::Semantic(knowledge) = &entity.payload else {
            return 0.0;
        };
        match (knowledge.vector_source, &query.model) {
            (Some(VectorSource::Model), Some(model)) => cosine_similarity(&knowledge.vector, model),
            (Some(VectorSource::Fallback), _) => {
                cosine_similarity(&knowledge.vector, &query.fallback)
            }
            _ => cosine_similarity(
                &self.embeddings.fallback_vector(&knowledge.content),
                &query.fallback,
            ),
        }
    }
}

//! Entity Type Definitions
//!
//! Every stored record is a `MemoryEntity`: common base fields plus one
//! tier-specific payload. The payload is a tagged union, so the tier an
//! entity belongs to is decided by its variant and dispatch on tier is
//! exhaustive.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Sensitivity, Tier};
use crate::utils::{content_hash, require_non_empty, require_unit_interval, FieldError};

/// Transient key/value held in working memory until its TTL elapses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub ttl_seconds: u64,
}

/// Workflow execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One step event inside a workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub sequence: u32,
    pub name: String,
    pub agent: Option<String>,
    pub data: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Full workflow execution snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicRecord {
    pub workflow_id: String,
    pub steps: Vec<StepEvent>,
    pub inputs: serde_json::Value,
    pub outputs: serde_json::Value,
    pub status: WorkflowStatus,
}

impl EpisodicRecord {
    /// True when `self` keeps every step of `previous` as an unchanged prefix
    pub fn extends(&self, previous: &EpisodicRecord) -> bool {
        self.workflow_id == previous.workflow_id
            && self.steps.len() >= previous.steps.len()
            && self.steps[..previous.steps.len()] == previous.steps[..]
    }
}

/// Where a semantic vector came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSource {
    Model,
    Fallback,
}

/// Knowledge item with an embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticKnowledge {
    pub content: String,
    pub content_type: String,
    pub source: String,
    pub confidence: f64,
    /// Filled in by the Manager on store
    #[serde(default)]
    pub vector: Vec<f32>,
    #[serde(default)]
    pub vector_source: Option<VectorSource>,
}

/// Edge between two stored entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub from_id: String,
    pub to_id: String,
    /// Resolved by the Manager when the edge is created
    #[serde(default)]
    pub from_tier: Option<Tier>,
    #[serde(default)]
    pub to_tier: Option<Tier>,
    pub relation_type: String,
    pub strength: f64,
    pub bidirectional: bool,
}

/// Tier-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum EntityPayload {
    Working(WorkingEntry),
    Episodic(EpisodicRecord),
    Semantic(SemanticKnowledge),
    Graph(GraphRelationship),
}

impl EntityPayload {
    /// Tier this payload is routed to
    pub fn tier(&self) -> Tier {
        match self {
            Self::Working(_) => Tier::Working,
            Self::Episodic(_) => Tier::Episodic,
            Self::Semantic(_) => Tier::Semantic,
            Self::Graph(_) => Tier::Graph,
        }
    }

    /// Check required fields and value ranges
    pub fn validate(&self) -> Result<(), FieldError> {
        match self {
            Self::Working(w) => {
                require_non_empty("key", &w.key)?;
                if w.ttl_seconds == 0 {
                    return Err(FieldError::invalid("ttl_seconds", "must be greater than 0"));
                }
            }
            Self::Episodic(e) => {
                require_non_empty("workflow_id", &e.workflow_id)?;
                for pair in e.steps.windows(2) {
                    if pair[1].sequence <= pair[0].sequence {
                        return Err(FieldError::invalid(
                            "steps",
                            format!(
                                "step sequence must increase ({} follows {})",
                                pair[1].sequence, pair[0].sequence
                            ),
                        ));
                    }
                }
                for step in &e.steps {
                    require_non_empty("steps.name", &step.name)?;
                }
            }
            Self::Semantic(s) => {
                require_non_empty("content", &s.content)?;
                require_non_empty("content_type", &s.content_type)?;
                require_non_empty("source", &s.source)?;
                require_unit_interval("confidence", s.confidence)?;
                if s.vector.iter().any(|v| !v.is_finite()) {
                    return Err(FieldError::invalid("vector", "contains non-finite values"));
                }
            }
            Self::Graph(g) => {
                require_non_empty("from_id", &g.from_id)?;
                require_non_empty("to_id", &g.to_id)?;
                require_non_empty("relation_type", &g.relation_type)?;
                require_unit_interval("strength", g.strength)?;
                if g.from_id == g.to_id {
                    return Err(FieldError::invalid("to_id", "self-referencing edge"));
                }
            }
        }
        Ok(())
    }

    /// Canonical serialized form that checksums are computed over
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// SHA-256 over the canonical serialized form
    pub fn checksum(&self) -> Result<String, serde_json::Error> {
        Ok(content_hash(&self.canonical_json()?))
    }

    /// Top-level field value used by metadata filters
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => map.remove(name),
            _ => None,
        }
    }
}

/// A stored entity at one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntity {
    pub id: String,
    pub owner: String,
    pub sensitivity: Sensitivity,
    pub created_at: DateTime<Utc>,
    /// When this version was written
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub checksum: String,
    pub payload: EntityPayload,
}

impl MemoryEntity {
    pub fn tier(&self) -> Tier {
        self.payload.tier()
    }

    /// Expiry instant for working entries
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match &self.payload {
            EntityPayload::Working(w) => {
                let expiry = i64::try_from(w.ttl_seconds)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .and_then(|ttl| self.created_at.checked_add_signed(ttl));
                Some(expiry.unwrap_or(DateTime::<Utc>::MAX_UTC))
            }
            _ => None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }

    pub fn as_working(&self) -> Option<&WorkingEntry> {
        match &self.payload {
            EntityPayload::Working(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_episodic(&self) -> Option<&EpisodicRecord> {
        match &self.payload {
            EntityPayload::Episodic(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_semantic(&self) -> Option<&SemanticKnowledge> {
        match &self.payload {
            EntityPayload::Semantic(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&GraphRelationship> {
        match &self.payload {
            EntityPayload::Graph(g) => Some(g),
            _ => None,
        }
    }
}

/// Input for storing a new entity
#[derive(Debug, Clone)]
pub struct NewEntity {
    /// Defaults to the calling actor's id
    pub owner: Option<String>,
    pub sensitivity: Sensitivity,
    pub payload: EntityPayload,
    /// Fail the store instead of falling back when the embedding provider
    /// times out (semantic tier only)
    pub require_real_embedding: bool,
}

impl NewEntity {
    pub fn new(payload: EntityPayload) -> Self {
        Self {
            owner: None,
            sensitivity: Sensitivity::default(),
            payload,
            require_real_embedding: false,
        }
    }

    pub fn working(key: impl Into<String>, value: serde_json::Value, ttl_seconds: u64) -> Self {
        Self::new(EntityPayload::Working(WorkingEntry {
            key: key.into(),
            value,
            ttl_seconds,
        }))
    }

    pub fn episodic(record: EpisodicRecord) -> Self {
        Self::new(EntityPayload::Episodic(record))
    }

    pub fn semantic(
        content: impl Into<String>,
        content_type: impl Into<String>,
        source: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self::new(EntityPayload::Semantic(SemanticKnowledge {
            content: content.into(),
            content_type: content_type.into(),
            source: source.into(),
            confidence,
            vector: Vec::new(),
            vector_source: None,
        }))
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn requiring_real_embedding(mut self) -> Self {
        self.require_real_embedding = true;
        self
    }

    pub fn tier(&self) -> Tier {
        self.payload.tier()
    }
}

/// Logical deletion marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub deleted_by: String,
    pub deleted_at: DateTime<Utc>,
    /// Version number the tombstone occupies
    pub version: u64,
}

/// Result of an administrative read that may include tombstoned data
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedEntity {
    pub entity: MemoryEntity,
    pub tombstone: Option<Tombstone>,
}

/// Options for `retrieve_with`
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieveOptions {
    pub include_tombstoned: bool,
    pub version: Option<u64>,
}

/// One entry in an entity's version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u64,
    pub checksum: Option<String>,
    pub written_at: DateTime<Utc>,
    pub tombstoned: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(sequence: u32, name: &str) -> StepEvent {
        StepEvent {
            sequence,
            name: name.into(),
            agent: Some("planner".into()),
            data: json!({ "ok": true }),
            recorded_at: Utc::now(),
        }
    }

    fn record(steps: Vec<StepEvent>) -> EpisodicRecord {
        EpisodicRecord {
            workflow_id: "wf-42".into(),
            steps,
            inputs: json!({ "account": "acme" }),
            outputs: json!(null),
            status: WorkflowStatus::Running,
        }
    }

    #[test]
    fn test_payload_tier_routing() {
        assert_eq!(NewEntity::working("k", json!(1), 10).tier(), Tier::Working);
        assert_eq!(NewEntity::episodic(record(vec![])).tier(), Tier::Episodic);
        assert_eq!(NewEntity::semantic("c", "note", "crm", 0.5).tier(), Tier::Semantic);
    }

    #[test]
    fn test_validation() {
        assert!(NewEntity::working("k", json!(1), 0).payload.validate().is_err());
        assert!(NewEntity::semantic("c", "note", "crm", 1.5).payload.validate().is_err());
        assert!(NewEntity::semantic("", "note", "crm", 0.5).payload.validate().is_err());

        let unordered = record(vec![step(2, "b"), step(1, "a")]);
        assert!(EntityPayload::Episodic(unordered).validate().is_err());

        let self_loop = EntityPayload::Graph(GraphRelationship {
            from_id: "a".into(),
            to_id: "a".into(),
            from_tier: None,
            to_tier: None,
            relation_type: "supports".into(),
            strength: 0.5,
            bidirectional: false,
        });
        assert!(self_loop.validate().is_err());
    }

    #[test]
    fn test_payload_serializes_with_tier_tag() {
        let payload = NewEntity::working("session", json!({ "step": 3 }), 60).payload;
        let json = payload.canonical_json().unwrap();
        assert!(json.contains("\"tier\":\"working\""));
        let back: EntityPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
        assert_eq!(payload.checksum().unwrap(), back.checksum().unwrap());
        assert_eq!(payload.field("key"), Some(json!("session")));
    }

    #[test]
    fn test_episodic_extends() {
        let v1 = record(vec![step(1, "intake")]);
        let mut v2 = v1.clone();
        v2.steps.push(step(2, "score"));
        assert!(v2.extends(&v1));
        assert!(!v1.extends(&v2));

        let mut rewritten = v2.clone();
        rewritten.steps[0].name = "changed".into();
        assert!(!rewritten.extends(&v1));
    }

    #[test]
    fn test_working_expiry() {
        let created = Utc::now();
        let entity = MemoryEntity {
            id: "w".into(),
            owner: "agent-1".into(),
            sensitivity: Sensitivity::Internal,
            created_at: created,
            updated_at: created,
            version: 1,
            checksum: String::new(),
            payload: NewEntity::working("k", json!(1), 30).payload,
        };
        assert!(!entity.is_expired_at(created + Duration::try_seconds(29).unwrap()));
        assert!(entity.is_expired_at(created + Duration::try_seconds(30).unwrap()));
    }
}

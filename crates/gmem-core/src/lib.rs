//! gmem-core - Governed multi-tier memory for agent workflows
//!
//! Four storage tiers behind one `MemoryManager`:
//!
//! - **working** - short-lived key/value entries with a TTL
//! - **episodic** - versioned workflow execution records
//! - **semantic** - versioned knowledge items with embedding vectors
//! - **graph** - versioned relationships between any stored entities
//!
//! Every call is checked against a role/tier/sensitivity `AccessPolicy` and
//! leaves exactly one entry in a hash-chained audit trail. Nothing is
//! overwritten in place: updates append versions, deletes append tombstones,
//! and every version carries a SHA-256 checksum verified on read.
//!
//! # Example
//!
//! ```rust,no_run
//! use gmem_core::{Actor, MemoryManager, NewEntity, SearchFilter, Tier};
//!
//! async fn example() -> gmem_core::MemoryResult<()> {
//!     let memory = MemoryManager::in_memory();
//!     let admin = Actor::admin("ops-1");
//!
//!     let id = memory
//!         .store(&admin, NewEntity::semantic("Guided onboarding cuts churn", "insight", "crm", 0.8))
//!         .await?;
//!     let entity = memory.retrieve(&admin, &id, Tier::Semantic).await?;
//!
//!     let hits = memory
//!         .search(&admin, Tier::Semantic, SearchFilter::new().similar("churn").with_top_k(3))
//!         .await?;
//!     for hit in &hits {
//!         println!("{} {:?}", hit.entity.id, hit.score);
//!     }
//!     # let _ = entity;
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod audit;
pub mod backend;
pub mod config;
pub mod embeddings;
pub mod entity;
pub mod error;
pub mod graph;
pub mod manager;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use access::{AccessDecision, AccessPolicy, DenyReason, PermissionSet, RoleGrant};
pub use audit::{verify_chain, AuditDecision, AuditQuery, AuditRecord, ChainVerification};
pub use backend::{TierBackend, TierBackends, TierStats};
pub use config::{ConfigValidationError, MemoryConfig};
pub use entity::{
    EntityPayload, EpisodicRecord, GraphRelationship, MemoryEntity, NewEntity, RetrieveOptions,
    RetrievedEntity, SemanticKnowledge, StepEvent, VersionInfo, WorkflowStatus, WorkingEntry,
};
pub use error::{ErrorKind, MemoryError, MemoryResult, StorageError};
pub use graph::{GraphPath, Neighbor, NodeRef};
pub use manager::{
    spawn_ttl_sweeper, MemoryManager, MemoryManagerBuilder, MemoryStats, NewRelationship,
    SearchFilter, SearchHit, SearchResults, SweepReport, SweeperHandle,
};
pub use types::{Actor, Operation, Permission, Sensitivity, Tier};

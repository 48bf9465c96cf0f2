//! Shared vocabulary for the memory core.
//!
//! Tiers, sensitivity classes, permissions, operations and the actor identity
//! that every Manager call carries.

use serde::{Deserialize, Serialize};

/// Storage tier (working, episodic, semantic, graph)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Working,
    Episodic,
    Semantic,
    Graph,
}

impl Tier {
    /// All tiers, in declaration order
    pub const ALL: [Tier; 4] = [Tier::Working, Tier::Episodic, Tier::Semantic, Tier::Graph];

    /// Convert from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "working" => Some(Self::Working),
            "episodic" => Some(Self::Episodic),
            "semantic" => Some(Self::Semantic),
            "graph" => Some(Self::Graph),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Graph => "graph",
        }
    }

    /// Whether entities in this tier keep superseded versions
    pub fn is_versioned(&self) -> bool {
        !matches!(self, Self::Working)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sensitivity classification, ordered from least to most sensitive
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Public,
    #[default]
    Internal,
    Confidential,
    Restricted,
}

impl Sensitivity {
    /// Convert from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "internal" => Some(Self::Internal),
            "confidential" => Some(Self::Confidential),
            "restricted" => Some(Self::Restricted),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Confidential => "confidential",
            Self::Restricted => "restricted",
        }
    }
}

impl std::fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Permission held by a role on a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Delete,
}

impl Permission {
    /// Convert from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Public Manager operation, as recorded in errors and the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Store,
    Retrieve,
    History,
    AppendVersion,
    Search,
    Delete,
    CreateRelationship,
    FindPaths,
    Neighbors,
    SweepExpired,
    AuditQuery,
    Stats,
}

impl Operation {
    /// Permission an operation requires on its tier
    pub fn permission(&self) -> Permission {
        match self {
            Self::Store | Self::AppendVersion | Self::CreateRelationship => Permission::Write,
            Self::Delete | Self::SweepExpired => Permission::Delete,
            Self::Retrieve
            | Self::History
            | Self::Search
            | Self::FindPaths
            | Self::Neighbors
            | Self::AuditQuery
            | Self::Stats => Permission::Read,
        }
    }

    /// Whether the operation mutates storage (audit failures fail closed)
    pub fn is_mutation(&self) -> bool {
        matches!(self.permission(), Permission::Write | Permission::Delete)
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Retrieve => "retrieve",
            Self::History => "history",
            Self::AppendVersion => "append_version",
            Self::Search => "search",
            Self::Delete => "delete",
            Self::CreateRelationship => "create_relationship",
            Self::FindPaths => "find_paths",
            Self::Neighbors => "neighbors",
            Self::SweepExpired => "sweep_expired",
            Self::AuditQuery => "audit_query",
            Self::Stats => "stats",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Built-in role with full access to every tier
pub const ROLE_ADMIN: &str = "admin";
/// Built-in role used by internal maintenance (sweeper, CLI)
pub const ROLE_SYSTEM: &str = "system";
/// Built-in role for workflow agents
pub const ROLE_AGENT: &str = "agent";

/// Authenticated caller identity. Role resolution happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, ROLE_ADMIN)
    }

    pub fn system() -> Self {
        Self::new("system", ROLE_SYSTEM)
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(id, ROLE_AGENT)
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.id, self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_conversion() {
        for tier in Tier::ALL {
            assert_eq!(Tier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(Tier::parse("long_term"), None);
        assert!(!Tier::Working.is_versioned());
        assert!(Tier::Graph.is_versioned());
    }

    #[test]
    fn test_sensitivity_ordering() {
        assert!(Sensitivity::Public < Sensitivity::Internal);
        assert!(Sensitivity::Internal < Sensitivity::Confidential);
        assert!(Sensitivity::Confidential < Sensitivity::Restricted);
        assert_eq!(Sensitivity::parse("restricted"), Some(Sensitivity::Restricted));
    }

    #[test]
    fn test_operation_permissions() {
        assert_eq!(Operation::Store.permission(), Permission::Write);
        assert_eq!(Operation::FindPaths.permission(), Permission::Read);
        assert_eq!(Operation::Delete.permission(), Permission::Delete);
        assert!(Operation::AppendVersion.is_mutation());
        assert!(!Operation::Search.is_mutation());
    }
}

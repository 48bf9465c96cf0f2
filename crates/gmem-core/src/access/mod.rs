//! Access Control Engine.
//!
//! Authorization is a pure table lookup: `(role, tier)` maps to a permission
//! set, and the entity's sensitivity must sit at or below the role's
//! clearance. RESTRICTED entities additionally need an explicit elevated grant
//! on the tier. Anything not granted is denied; an unknown role never falls
//! back to another role's grants.

mod policy;

pub use policy::{PolicyConfig, RolePolicyConfig};

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::types::{Permission, Sensitivity, Tier, ROLE_ADMIN, ROLE_AGENT, ROLE_SYSTEM};

/// Set of permissions a role holds on one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSet {
    read: bool,
    write: bool,
    delete: bool,
}

impl PermissionSet {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
        }
    }

    pub fn read_only() -> Self {
        Self::none().with(Permission::Read)
    }

    pub fn with(mut self, permission: Permission) -> Self {
        match permission {
            Permission::Read => self.read = true,
            Permission::Write => self.write = true,
            Permission::Delete => self.delete = true,
        }
        self
    }

    pub fn contains(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
            Permission::Delete => self.delete,
        }
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), |set, p| set.with(p))
    }
}

/// Everything one role is granted
#[derive(Debug, Clone, PartialEq)]
pub struct RoleGrant {
    pub clearance: Sensitivity,
    pub tiers: HashMap<Tier, PermissionSet>,
    /// Tiers on which RESTRICTED entities are accessible
    pub elevated: HashSet<Tier>,
}

impl RoleGrant {
    pub fn new(clearance: Sensitivity) -> Self {
        Self {
            clearance,
            tiers: HashMap::new(),
            elevated: HashSet::new(),
        }
    }

    /// Grant the same permissions on every tier
    pub fn everywhere(clearance: Sensitivity, permissions: PermissionSet) -> Self {
        let mut grant = Self::new(clearance);
        for tier in Tier::ALL {
            grant.tiers.insert(tier, permissions);
        }
        grant
    }

    pub fn on(mut self, tier: Tier, permissions: PermissionSet) -> Self {
        self.tiers.insert(tier, permissions);
        self
    }

    pub fn elevated_on(mut self, tier: Tier) -> Self {
        self.elevated.insert(tier);
        self
    }
}

/// Why a request was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("role '{role}' lacks {permission} on {tier}")]
    NotGranted {
        role: String,
        tier: Tier,
        permission: Permission,
    },

    #[error("{sensitivity} entity exceeds clearance {clearance}")]
    AboveClearance {
        clearance: Sensitivity,
        sensitivity: Sensitivity,
    },

    #[error("role '{role}' has no elevated grant for restricted data on {tier}")]
    RestrictedWithoutGrant { role: String, tier: Tier },
}

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Role → tier → permission table plus clearances
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPolicy {
    roles: HashMap<String, RoleGrant>,
}

impl AccessPolicy {
    /// Policy with no roles at all (denies everything)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in policy: `admin` and `system` hold every permission on every
    /// tier; `agent` may only read WORKING and SEMANTIC.
    pub fn default_policy() -> Self {
        Self::empty()
            .with_role(
                ROLE_ADMIN,
                RoleGrant::everywhere(Sensitivity::Confidential, PermissionSet::all()),
            )
            .with_role(
                ROLE_SYSTEM,
                RoleGrant::everywhere(Sensitivity::Confidential, PermissionSet::all()),
            )
            .with_role(
                ROLE_AGENT,
                RoleGrant::new(Sensitivity::Internal)
                    .on(Tier::Working, PermissionSet::read_only())
                    .on(Tier::Semantic, PermissionSet::read_only()),
            )
    }

    /// Add or replace a role
    pub fn with_role(mut self, role: impl Into<String>, grant: RoleGrant) -> Self {
        self.roles.insert(role.into(), grant);
        self
    }

    pub fn role(&self, role: &str) -> Option<&RoleGrant> {
        self.roles.get(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Decide whether `role` may perform `permission` on an entity of the
    /// given sensitivity in `tier`. Pure: no I/O, cannot fail.
    pub fn authorize(
        &self,
        role: &str,
        tier: Tier,
        permission: Permission,
        sensitivity: Sensitivity,
    ) -> AccessDecision {
        let Some(grant) = self.roles.get(role) else {
            return AccessDecision::Deny(DenyReason::UnknownRole(role.to_string()));
        };

        let granted = grant
            .tiers
            .get(&tier)
            .is_some_and(|set| set.contains(permission));
        if !granted {
            return AccessDecision::Deny(DenyReason::NotGranted {
                role: role.to_string(),
                tier,
                permission,
            });
        }

        if sensitivity == Sensitivity::Restricted {
            if grant.elevated.contains(&tier) {
                return AccessDecision::Allow;
            }
            return AccessDecision::Deny(DenyReason::RestrictedWithoutGrant {
                role: role.to_string(),
                tier,
            });
        }

        if sensitivity > grant.clearance {
            return AccessDecision::Deny(DenyReason::AboveClearance {
                clearance: grant.clearance,
                sensitivity,
            });
        }

        AccessDecision::Allow
    }

    /// Whether `role` may see entities of `sensitivity` on `tier` at all
    pub fn can_see(&self, role: &str, tier: Tier, sensitivity: Sensitivity) -> bool {
        self.authorize(role, tier, Permission::Read, sensitivity)
            .is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_PERMISSIONS: [Permission; 3] =
        [Permission::Read, Permission::Write, Permission::Delete];

    #[test]
    fn test_admin_and_system_hold_everything() {
        let policy = AccessPolicy::default_policy();
        for role in [ROLE_ADMIN, ROLE_SYSTEM] {
            for tier in Tier::ALL {
                for permission in ALL_PERMISSIONS {
                    assert!(policy
                        .authorize(role, tier, permission, Sensitivity::Confidential)
                        .is_allowed());
                }
            }
        }
    }

    #[test]
    fn test_agent_default_grants() {
        let policy = AccessPolicy::default_policy();
        let allowed = |tier, permission| {
            policy
                .authorize(ROLE_AGENT, tier, permission, Sensitivity::Public)
                .is_allowed()
        };
        assert!(allowed(Tier::Working, Permission::Read));
        assert!(allowed(Tier::Semantic, Permission::Read));
        assert!(!allowed(Tier::Working, Permission::Write));
        assert!(!allowed(Tier::Episodic, Permission::Read));
        assert!(!allowed(Tier::Graph, Permission::Read));
    }

    #[test]
    fn test_default_deny_for_ungranted_pairs() {
        let policy = AccessPolicy::default_policy();
        for role in [ROLE_ADMIN, ROLE_SYSTEM, ROLE_AGENT, "auditor", ""] {
            for tier in Tier::ALL {
                for permission in ALL_PERMISSIONS {
                    let granted = policy
                        .role(role)
                        .and_then(|g| g.tiers.get(&tier))
                        .is_some_and(|set| set.contains(permission));
                    let decision =
                        policy.authorize(role, tier, permission, Sensitivity::Public);
                    assert_eq!(decision.is_allowed(), granted, "{role} {tier} {permission}");
                }
            }
        }
    }

    #[test]
    fn test_unknown_role_denied() {
        let policy = AccessPolicy::default_policy();
        assert_eq!(
            policy.authorize("intruder", Tier::Working, Permission::Read, Sensitivity::Public),
            AccessDecision::Deny(DenyReason::UnknownRole("intruder".into()))
        );
        assert!(!AccessPolicy::empty()
            .authorize(ROLE_ADMIN, Tier::Working, Permission::Read, Sensitivity::Public)
            .is_allowed());
    }

    #[test]
    fn test_clearance_and_restricted() {
        let policy = AccessPolicy::default_policy();
        assert!(matches!(
            policy.authorize(ROLE_AGENT, Tier::Semantic, Permission::Read, Sensitivity::Confidential),
            AccessDecision::Deny(DenyReason::AboveClearance { .. })
        ));
        assert!(matches!(
            policy.authorize(ROLE_ADMIN, Tier::Semantic, Permission::Read, Sensitivity::Restricted),
            AccessDecision::Deny(DenyReason::RestrictedWithoutGrant { .. })
        ));

        let elevated = AccessPolicy::default_policy().with_role(
            "compliance",
            RoleGrant::everywhere(Sensitivity::Confidential, PermissionSet::read_only())
                .elevated_on(Tier::Episodic),
        );
        assert!(elevated
            .authorize("compliance", Tier::Episodic, Permission::Read, Sensitivity::Restricted)
            .is_allowed());
        assert!(!elevated
            .authorize("compliance", Tier::Semantic, Permission::Read, Sensitivity::Restricted)
            .is_allowed());
    }

    #[test]
    fn test_deny_reason_messages() {
        let reason = DenyReason::NotGranted {
            role: "agent".into(),
            tier: Tier::Graph,
            permission: Permission::Write,
        };
        assert_eq!(reason.to_string(), "role 'agent' lacks write on graph");

        let boxed: Box<dyn std::error::Error> = Box::new(DenyReason::AboveClearance {
            clearance: Sensitivity::Internal,
            sensitivity: Sensitivity::Confidential,
        });
        assert_eq!(boxed.to_string(), "confidential entity exceeds clearance internal");
        assert_eq!(
            DenyReason::UnknownRole("ghost".into()).to_string(),
            "unknown role 'ghost'"
        );
    }
}

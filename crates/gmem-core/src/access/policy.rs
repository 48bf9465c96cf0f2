//! Policy overrides loaded from configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{AccessPolicy, PermissionSet, RoleGrant};
use crate::config::ConfigValidationError;
use crate::types::{Permission, Sensitivity, Tier};

/// `[policy]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Start from an empty table instead of the built-in roles
    pub replace_defaults: bool,
    pub roles: BTreeMap<String, RolePolicyConfig>,
}

/// `[policy.roles.<name>]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolePolicyConfig {
    /// Built-in role whose grants this role starts from
    pub extends: Option<String>,
    pub clearance: Option<String>,
    /// Tiers on which RESTRICTED entities are granted
    pub elevated: Vec<String>,
    /// tier name -> permission names
    pub tiers: BTreeMap<String, Vec<String>>,
}

fn parse_tier(field: &str, name: &str) -> Result<Tier, ConfigValidationError> {
    Tier::parse(name).ok_or_else(|| ConfigValidationError::UnknownTier {
        field: field.to_string(),
        name: name.to_string(),
    })
}

impl AccessPolicy {
    /// Build a policy from its configuration form.
    ///
    /// Named roles replace the built-in role of the same name entirely; a role
    /// that `extends` a built-in starts from a copy of its grants. Unknown
    /// tier, permission or sensitivity names are rejected rather than ignored.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigValidationError> {
        let builtin = AccessPolicy::default_policy();
        let mut policy = if config.replace_defaults {
            AccessPolicy::empty()
        } else {
            builtin.clone()
        };

        for (role, role_config) in &config.roles {
            if role.trim().is_empty() {
                return Err(ConfigValidationError::InvalidValue {
                    field: "policy.roles".into(),
                    message: "role name must not be empty".into(),
                });
            }
            let prefix = format!("policy.roles.{}", role);

            let mut grant = match &role_config.extends {
                Some(base) => builtin
                    .role(base)
                    .cloned()
                    .ok_or_else(|| ConfigValidationError::UnknownRole(base.clone()))?,
                None => RoleGrant::new(Sensitivity::default()),
            };

            if let Some(clearance) = &role_config.clearance {
                grant.clearance = Sensitivity::parse(clearance).ok_or_else(|| {
                    ConfigValidationError::InvalidValue {
                        field: format!("{}.clearance", prefix),
                        message: format!("unknown sensitivity '{}'", clearance),
                    }
                })?;
            }

            for tier_name in &role_config.elevated {
                let tier = parse_tier(&format!("{}.elevated", prefix), tier_name)?;
                grant.elevated.insert(tier);
            }

            for (tier_name, permissions) in &role_config.tiers {
                let field = format!("{}.tiers.{}", prefix, tier_name);
                let tier = parse_tier(&field, tier_name)?;
                let set = permissions
                    .iter()
                    .map(|p| {
                        Permission::parse(p).ok_or_else(|| ConfigValidationError::InvalidValue {
                            field: field.clone(),
                            message: format!("unknown permission '{}'", p),
                        })
                    })
                    .collect::<Result<PermissionSet, _>>()?;
                grant.tiers.insert(tier, set);
            }

            policy = policy.with_role(role.clone(), grant);
        }

        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessDecision;
    use crate::types::ROLE_AGENT;

    fn parse(toml_str: &str) -> PolicyConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_empty_config_is_default_policy() {
        let policy = AccessPolicy::from_config(&PolicyConfig::default()).unwrap();
        assert_eq!(policy, AccessPolicy::default_policy());
    }

    #[test]
    fn test_role_override() {
        let config = parse(
            r#"
            [roles.agent]
            clearance = "internal"
            [roles.agent.tiers]
            working = ["read", "write"]
            episodic = ["read"]
            "#,
        );
        let policy = AccessPolicy::from_config(&config).unwrap();
        assert!(policy
            .authorize(ROLE_AGENT, Tier::Episodic, Permission::Read, Sensitivity::Internal)
            .is_allowed());
        // Replaced entirely: the semantic grant from the built-in role is gone
        assert!(!policy
            .authorize(ROLE_AGENT, Tier::Semantic, Permission::Read, Sensitivity::Public)
            .is_allowed());
    }

    #[test]
    fn test_extends_and_elevated() {
        let config = parse(
            r#"
            [roles.compliance]
            extends = "admin"
            elevated = ["episodic"]
            "#,
        );
        let policy = AccessPolicy::from_config(&config).unwrap();
        assert_eq!(
            policy.authorize("compliance", Tier::Episodic, Permission::Delete, Sensitivity::Restricted),
            AccessDecision::Allow
        );
    }

    #[test]
    fn test_rejects_unknown_names() {
        let bad_tier = parse("[roles.agent.tiers]\nlong_term = [\"read\"]");
        assert!(matches!(
            AccessPolicy::from_config(&bad_tier),
            Err(ConfigValidationError::UnknownTier { .. })
        ));

        let bad_permission = parse("[roles.agent.tiers]\nworking = [\"admin\"]");
        assert!(matches!(
            AccessPolicy::from_config(&bad_permission),
            Err(ConfigValidationError::InvalidValue { .. })
        ));

        let bad_base = parse("[roles.ops]\nextends = \"root\"");
        assert!(matches!(
            AccessPolicy::from_config(&bad_base),
            Err(ConfigValidationError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_replace_defaults() {
        let config = parse("replace_defaults = true\n[roles.reader.tiers]\nsemantic = [\"read\"]");
        let policy = AccessPolicy::from_config(&config).unwrap();
        assert!(policy.role("admin").is_none());
        assert!(policy.role("reader").is_some());
    }
}

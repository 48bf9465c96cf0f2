//! Memory Core Configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::access::{AccessPolicy, PolicyConfig};

/// Top-level configuration for a `MemoryManager`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub working: WorkingConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub graph: GraphConfig,
    pub backend: BackendConfig,

    /// Access policy override (built-in policy when absent)
    pub policy: Option<PolicyConfig>,
}

/// Working memory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingConfig {
    /// TTL for entries created without an explicit one (default: 3600 = 1 hour)
    pub default_ttl_seconds: u64,

    /// Background sweep period (default: 60)
    pub sweep_interval_seconds: u64,
}

impl Default for WorkingConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3600, // 1 hour
            sweep_interval_seconds: 60,
        }
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Bound on a single embed call (default: 2000)
    pub timeout_ms: u64,

    /// Dimension of the fallback vector (default: 384)
    pub dimensions: usize,

    /// Fail semantic stores when only the fallback vector is available
    pub require_real: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            dimensions: 384,
            require_real: false,
        }
    }
}

/// Search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// top-k when a semantic query does not give one (default: 10)
    pub default_top_k: usize,

    /// Drop semantic hits scoring below this
    pub min_similarity: Option<f32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            min_similarity: None,
        }
    }
}

/// Graph query settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Largest `max_depth` accepted by path search (default: 8)
    pub max_depth_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { max_depth_limit: 8 }
    }
}

/// Backend access settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Extra attempts for reads that hit an unavailable backend (default: 2)
    pub read_retries: u32,

    /// Base backoff, doubled per attempt (default: 25)
    pub retry_backoff_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            read_retries: 2,
            retry_backoff_ms: 25,
        }
    }
}

impl MemoryConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigValidationError> {
        let config: MemoryConfig =
            toml::from_str(s).map_err(|e| ConfigValidationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the access policy override
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding.timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.working.sweep_interval_seconds)
    }

    /// Resolve the effective access policy
    pub fn access_policy(&self) -> Result<AccessPolicy, ConfigValidationError> {
        match &self.policy {
            Some(policy) => AccessPolicy::from_config(policy),
            None => Ok(AccessPolicy::default_policy()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let positive = |field: &str, value: u64| {
            if value == 0 {
                Err(ConfigValidationError::InvalidValue {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                })
            } else {
                Ok(())
            }
        };

        positive("working.default_ttl_seconds", self.working.default_ttl_seconds)?;
        positive("working.sweep_interval_seconds", self.working.sweep_interval_seconds)?;
        positive("embedding.timeout_ms", self.embedding.timeout_ms)?;
        positive("embedding.dimensions", self.embedding.dimensions as u64)?;
        positive("search.default_top_k", self.search.default_top_k as u64)?;
        positive("graph.max_depth_limit", self.graph.max_depth_limit as u64)?;

        if let Some(min) = self.search.min_similarity {
            if !(-1.0..=1.0).contains(&min) {
                return Err(ConfigValidationError::InvalidValue {
                    field: "search.min_similarity".into(),
                    message: "must be between -1 and 1".into(),
                });
            }
        }

        self.access_policy()?;
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("unknown tier '{name}' in {field}")]
    UnknownTier { field: String, name: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MemoryConfig::default();
        assert_eq!(config.working.default_ttl_seconds, 3600);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.graph.max_depth_limit, 8);
        assert_eq!(config.backend.read_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = MemoryConfig::from_toml_str(
            r#"
            [embedding]
            timeout_ms = 250

            [search]
            min_similarity = 0.2

            [policy.roles.agent.tiers]
            working = ["read"]
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding.timeout_ms, 250);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.search.min_similarity, Some(0.2));
        assert!(config.policy.is_some());

        assert_eq!(MemoryConfig::from_toml_str("").unwrap(), MemoryConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MemoryConfig::default();
        config.working.default_ttl_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = MemoryConfig::default();
        config.graph.max_depth_limit = 0;
        assert!(config.validate().is_err());

        assert!(matches!(
            MemoryConfig::from_toml_str("[search]\ndefault_top_k = 0"),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
        assert!(matches!(
            MemoryConfig::from_toml_str("[policy.roles.agent.tiers]\ncold = [\"read\"]"),
            Err(ConfigValidationError::UnknownTier { .. })
        ));
        assert!(matches!(
            MemoryConfig::from_toml_str("[graph\n"),
            Err(ConfigValidationError::Parse(_))
        ));
    }
}

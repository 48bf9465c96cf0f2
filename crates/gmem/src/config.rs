//! Configuration management for gmem.
//!
//! Configuration is loaded with precedence:
//! 1. Environment variables (GMEM_CONFIG, GMEM_DATA_DIR)
//! 2. Config file (`config.toml` in the platform config directory)
//! 3. Default values
//!
//! The file holds a `[storage]` section for the CLI plus every
//! `MemoryConfig` section (`[working]`, `[embedding]`, `[policy]`, ...).

use anyhow::{Context, Result};
use directories::ProjectDirs;
use gmem_core::MemoryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the databases live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one SQLite file per tier plus `audit.db`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    storage: StorageConfig,
}

/// Main configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub storage: StorageConfig,
    pub memory: MemoryConfig,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "gmem", "gmem")
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GMEM_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(proj_dirs) = project_dirs() {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gmem")
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            Self::from_file(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).context("Failed to parse [storage]")?;
        let memory = MemoryConfig::from_toml_str(content)?;
        Ok(Self {
            storage: file.storage,
            memory,
        })
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("GMEM_CONFIG") {
            return PathBuf::from(path);
        }
        match project_dirs() {
            Some(proj_dirs) => proj_dirs.config_dir().join("config.toml"),
            None => default_data_dir().join("config.toml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = Config::parse(
            r#"
            [storage]
            data_dir = "/var/lib/gmem"

            [working]
            default_ttl_seconds = 120

            [policy.roles.auditor]
            clearance = "confidential"
            [policy.roles.auditor.tiers]
            working = ["read"]
            episodic = ["read"]
            semantic = ["read"]
            graph = ["read"]
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/gmem"));
        assert_eq!(config.memory.working.default_ttl_seconds, 120);
        let policy = config.memory.access_policy().unwrap();
        assert!(policy.role("auditor").is_some());
        assert!(policy.role("admin").is_some());
    }

    #[test]
    fn test_bad_policy_rejected() {
        let result = Config::parse(
            r#"
            [policy.roles.agent.tiers]
            long_term = ["read"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[graph]\nmax_depth_limit = 4\n").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.memory.graph.max_depth_limit, 4);
    }
}

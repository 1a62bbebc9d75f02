//! YAML configuration for the whole matching stack.
//!
//! Every section is optional and falls back to the crate defaults.
//!
//! ```yaml
//! version: "1"
//! name: "production"
//!
//! normalize:
//!   max_input_bytes: 512
//!
//! index:
//!   backend:
//!     kind: redb
//!     path: /var/lib/addrmatch/index.redb
//!   collision_sample_size: 5
//!
//! cache:
//!   fingerprint_ttl_secs: 3600
//!   normalized_ttl_secs: 1800
//!   join_ttl_secs: 300
//!   negative_ttl_secs: 60
//!
//! matcher:
//!   max_results: 10
//!   active_statuses: [Active, Pending, Suspended]
//!   index_timeout_ms: 250
//!   join_timeout_ms: 2000
//!
//! maintenance:
//!   backfill_batch_size: 200
//!   tombstone_retention_days: 30
//! ```

use std::fs;
use std::path::Path;

use cache::CacheConfig;
use canonical::NormalizeConfig;
use index::IndexConfig;
use matcher::MatchConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddrMatchConfig {
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub normalize: NormalizeConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub matcher: MatchConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl AddrMatchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: AddrMatchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigLoadError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        let invalid = |section: &str, err: &dyn std::fmt::Display| {
            ConfigLoadError::Validation(format!("{section}: {err}"))
        };
        self.normalize
            .validate()
            .map_err(|e| invalid("normalize", &e))?;
        self.index.validate().map_err(|e| invalid("index", &e))?;
        self.cache.validate().map_err(|e| invalid("cache", &e))?;
        self.matcher
            .validate()
            .map_err(|e| invalid("matcher", &e))?;
        self.maintenance.validate()?;
        Ok(())
    }
}

impl Default for AddrMatchConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            name: None,
            normalize: NormalizeConfig::default(),
            index: IndexConfig::default(),
            cache: CacheConfig::default(),
            matcher: MatchConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// Offline jobs: backfill and tombstone purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub backfill_batch_size: usize,
    /// Tombstones older than this are removed by the purge job.
    pub tombstone_retention_days: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            backfill_batch_size: 200,
            tombstone_retention_days: 30,
        }
    }
}

impl MaintenanceConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.backfill_batch_size == 0 {
            return Err(ConfigLoadError::Validation(
                "maintenance.backfill_batch_size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

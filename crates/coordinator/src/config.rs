//! Coordinator configuration: YAML file plus `NACHOS_*` environment overrides.

use crate::classifier::TierRule;
use nachos_cache::CacheConfig;
use nachos_core::{SecurityMode, SecurityTier};
use nachos_policy::Effect;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub tool_timeout_ms: u64,
    pub security_mode: SecurityMode,
    pub approval_timeout_ms: u64,
    pub cache: CacheSettings,
    pub policy: PolicySettings,
    pub classifier: ClassifierSettings,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: 30_000,
            security_mode: SecurityMode::Standard,
            approval_timeout_ms: 120_000,
            cache: CacheSettings::default(),
            policy: PolicySettings::default(),
            classifier: ClassifierSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub max_entries: usize,
    pub cleanup_interval_secs: u64,
    pub remote_ttl_on_hit_secs: u64,
    pub remote_url: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 300,
            max_entries: 1000,
            cleanup_interval_secs: 60,
            remote_ttl_on_hit_secs: 60,
            remote_url: None,
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_secs(self.default_ttl_secs),
            max_entries: self.max_entries,
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            remote_hit_ttl: Duration::from_secs(self.remote_ttl_on_hit_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub default_effect: Effect,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            default_effect: Effect::Deny,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Exact tool name to tier; wins over every rule.
    pub tier_overrides: HashMap<String, SecurityTier>,
    /// Extra rules, tried before the built-in ones.
    pub rules: Vec<TierRule>,
    /// Parameters that identify the resource a call touches.
    pub resource_keys: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            tier_overrides: HashMap::new(),
            rules: Vec::new(),
            resource_keys: vec!["path".to_string(), "url".to_string()],
        }
    }
}

impl CoordinatorConfig {
    /// Read a YAML file, apply environment overrides and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; `apply_env_overrides` passes the
    /// process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("NACHOS_TOOL_TIMEOUT_MS") {
            self.tool_timeout_ms = parse_value("NACHOS_TOOL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("NACHOS_SECURITY_MODE") {
            self.security_mode = value.parse().map_err(|message| ConfigError::InvalidValue {
                key: "NACHOS_SECURITY_MODE".to_string(),
                message,
            })?;
        }
        if let Some(value) = lookup("NACHOS_APPROVAL_TIMEOUT_MS") {
            self.approval_timeout_ms = parse_value("NACHOS_APPROVAL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("NACHOS_CACHE_ENABLED") {
            self.cache.enabled = parse_bool("NACHOS_CACHE_ENABLED", &value)?;
        }
        if let Some(value) = lookup("NACHOS_CACHE_TTL_SECS") {
            self.cache.default_ttl_secs = parse_value("NACHOS_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = lookup("NACHOS_REDIS_URL") {
            let value = value.trim().to_string();
            self.cache.remote_url = (!value.is_empty()).then_some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("tool_timeout_ms", self.tool_timeout_ms),
            ("approval_timeout_ms", self.approval_timeout_ms),
            ("cache.cleanup_interval_secs", self.cache.cleanup_interval_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache.max_entries".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

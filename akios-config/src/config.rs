//! `config.yaml` schema, env-override layer, and validation.
//!
//! Load order follows `knhk-config`'s `load_config`: defaults, then the
//! file on disk, then `AKIOS_*`-prefixed environment overrides.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionStrategy {
    Mask,
    Hash,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default = "default_max_open_files")]
    pub max_open_files: u64,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_tokens_per_call")]
    pub max_tokens_per_call: u64,
    #[serde(default = "default_budget_limit_per_run")]
    pub budget_limit_per_run: f64,
    #[serde(default = "default_redaction_strategy")]
    pub redaction_strategy: RedactionStrategy,
    #[serde(default = "default_rotation_threshold")]
    pub rotation_threshold: u64,
    #[serde(default = "default_memory_cap")]
    pub memory_cap: usize,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

fn default_cpu_limit() -> f64 {
    0.5
}
fn default_memory_limit_mb() -> u64 {
    512
}
fn default_max_open_files() -> u64 {
    256
}
fn default_max_file_size_mb() -> u64 {
    50
}
fn default_max_tokens_per_call() -> u64 {
    4096
}
fn default_budget_limit_per_run() -> f64 {
    5.0
}
fn default_redaction_strategy() -> RedactionStrategy {
    RedactionStrategy::Mask
}
fn default_rotation_threshold() -> u64 {
    50_000
}
fn default_memory_cap() -> usize {
    1_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cpu_limit: default_cpu_limit(),
            memory_limit_mb: default_memory_limit_mb(),
            max_open_files: default_max_open_files(),
            max_file_size_mb: default_max_file_size_mb(),
            max_tokens_per_call: default_max_tokens_per_call(),
            budget_limit_per_run: default_budget_limit_per_run(),
            redaction_strategy: default_redaction_strategy(),
            rotation_threshold: default_rotation_threshold(),
            memory_cap: default_memory_cap(),
            allowed_domains: Vec::new(),
            allowed_commands: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&raw)?
        } else {
            Config::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AKIOS_CPU_LIMIT") {
            if let Ok(v) = v.parse() {
                self.cpu_limit = v;
            }
        }
        if let Ok(v) = std::env::var("AKIOS_MEMORY_LIMIT_MB") {
            if let Ok(v) = v.parse() {
                self.memory_limit_mb = v;
            }
        }
        if let Ok(v) = std::env::var("AKIOS_BUDGET_LIMIT_PER_RUN") {
            if let Ok(v) = v.parse() {
                self.budget_limit_per_run = v;
            }
        }
        if let Ok(v) = std::env::var("AKIOS_REDACTION_STRATEGY") {
            self.redaction_strategy = match v.to_lowercase().as_str() {
                "hash" => RedactionStrategy::Hash,
                "remove" => RedactionStrategy::Remove,
                _ => RedactionStrategy::Mask,
            };
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.cpu_limit) || self.cpu_limit <= 0.0 {
            return Err(ConfigError::Invalid("cpu_limit must be in (0,1]".into()));
        }
        if self.memory_limit_mb == 0 {
            return Err(ConfigError::Invalid("memory_limit_mb must be > 0".into()));
        }
        if self.max_open_files < 10 {
            return Err(ConfigError::Invalid("max_open_files must be >= 10".into()));
        }
        if self.max_file_size_mb == 0 {
            return Err(ConfigError::Invalid("max_file_size_mb must be > 0".into()));
        }
        if self.max_tokens_per_call == 0 {
            return Err(ConfigError::Invalid("max_tokens_per_call must be > 0".into()));
        }
        if self.budget_limit_per_run <= 0.0 {
            return Err(ConfigError::Invalid("budget_limit_per_run must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_cpu_limit() {
        let mut config = Config::default();
        config.cpu_limit = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_missing_file_as_defaults() {
        let config = Config::load("/nonexistent/config.yaml").unwrap();
        assert_eq!(config.cpu_limit, default_cpu_limit());
    }
}

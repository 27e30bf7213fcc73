//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ADMIN_CAPABILITY, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL_SECS, ENV_ADMIN_CAPABILITY,
    ENV_CACHE_CAPACITY, ENV_CACHE_ENABLED, ENV_CACHE_TTL_SECS, MAX_CACHE_TTL_SECS,
};
use crate::error::{ResolveError, Result};
use crate::model::validate_capability_name;

/// Permission cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Upper bound on how long an aggregated set may be served
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_entries: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.min(MAX_CACHE_TTL_SECS))
    }

    /// A zero TTL or zero capacity turns the cache off
    pub fn is_active(&self) -> bool {
        self.enabled && self.ttl_secs > 0 && self.max_entries > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    /// Required of the actor behind an administrative mutation batch
    pub admin_capability: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { cache: CacheConfig::default(), admin_capability: DEFAULT_ADMIN_CAPABILITY.to_string() }
    }
}

impl EngineConfig {
    pub fn without_cache() -> Self {
        EngineConfig { cache: CacheConfig { enabled: false, ..CacheConfig::default() }, ..Self::default() }
    }

    /// Defaults overridden by `ROLEGATE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut cache = CacheConfig::default();
        if let Some(v) = lookup(ENV_CACHE_ENABLED) {
            cache.enabled = parse_bool(ENV_CACHE_ENABLED, &v)?;
        }
        if let Some(v) = lookup(ENV_CACHE_TTL_SECS) {
            cache.ttl_secs = parse_u64(ENV_CACHE_TTL_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_CACHE_CAPACITY) {
            cache.max_entries = parse_u64(ENV_CACHE_CAPACITY, &v)?;
        }
        let admin_capability = match lookup(ENV_ADMIN_CAPABILITY) {
            Some(v) => {
                let v = v.trim().to_string();
                validate_capability_name(&v)?;
                v
            }
            None => DEFAULT_ADMIN_CAPABILITY.to_string(),
        };
        Ok(EngineConfig { cache, admin_capability })
    }
}

fn parse_bool(name: &str, v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ResolveError::InvalidInput(format!("{} must be a boolean, got '{}'", name, v))),
    }
}

fn parse_u64(name: &str, v: &str) -> Result<u64> {
    v.trim()
        .parse()
        .map_err(|_| ResolveError::InvalidInput(format!("{} must be a non-negative integer, got '{}'", name, v)))
}

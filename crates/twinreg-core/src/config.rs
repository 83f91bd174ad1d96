//! Registry configuration.
//!
//! Defaults live in the constant modules below; every value can be
//! overridden through the `TWINREG_*` environment variables or by
//! deserializing a [`RegistryConfig`] from JSON (missing fields fall back
//! to the defaults).

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    /// Attempts of one conditional write before giving up (0 = unbounded).
    pub const RETRY_MAX_ATTEMPTS: u32 = 32;
    pub const RETRY_INITIAL_BACKOFF_MS: u64 = 5;
    pub const RETRY_MAX_BACKOFF_MS: u64 = 1_000;
    /// Query page size.
    pub const PAGE_SIZE: usize = 100;
    /// Lost entities older than this are purged (24h).
    pub const PURGE_AFTER_MS: u64 = 24 * 60 * 60 * 1000;
    pub const STORAGE_BACKEND: &str = "memory";
    pub const STORAGE_PATH: &str = "./data/registry.redb";
    pub const LOG_FILTER: &str = "twinreg=info";
}

/// Environment variable names.
pub mod env_vars {
    pub const RETRY_MAX_ATTEMPTS: &str = "TWINREG_RETRY_MAX_ATTEMPTS";
    pub const RETRY_INITIAL_BACKOFF_MS: &str = "TWINREG_RETRY_INITIAL_BACKOFF_MS";
    pub const RETRY_MAX_BACKOFF_MS: &str = "TWINREG_RETRY_MAX_BACKOFF_MS";
    pub const PAGE_SIZE: &str = "TWINREG_PAGE_SIZE";
    pub const PURGE_AFTER_MS: &str = "TWINREG_PURGE_AFTER_MS";
    pub const STORAGE_BACKEND: &str = "TWINREG_STORAGE_BACKEND";
    pub const STORAGE_PATH: &str = "TWINREG_STORAGE_PATH";
    pub const LOG_JSON: &str = "TWINREG_LOG_JSON";
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|s| s.trim().parse().ok())
}

/// Retry policy for conditional writes that lose a generation race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts, 0 for unbounded.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_backoff_ms: defaults::RETRY_INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::RETRY_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Retry forever without waiting.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Give up after `max_attempts` attempts.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Whether another attempt may follow `attempts` failed ones.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }

    /// Delay before the attempt following `attempts` failed ones.
    ///
    /// Exponential in the attempt count, capped, with full jitter.
    pub fn backoff(&self, attempts: u32) -> Duration {
        if self.initial_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let exp = attempts.saturating_sub(1).min(20);
        let ceiling = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        let millis = rand::thread_rng().gen_range(0..=ceiling);
        Duration::from_millis(millis)
    }
}

/// Registry behaviour configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub retry: RetryPolicy,
    pub page_size: usize,
    /// Minimum age (ms) of a lost entity before it is purged.
    pub purge_after_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            page_size: defaults::PAGE_SIZE,
            purge_after_ms: defaults::PURGE_AFTER_MS,
        }
    }
}

impl RegistryConfig {
    /// Load from environment variables, or return defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = parsed(&lookup, env_vars::RETRY_MAX_ATTEMPTS) {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::RETRY_INITIAL_BACKOFF_MS) {
            config.retry.initial_backoff_ms = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::RETRY_MAX_BACKOFF_MS) {
            config.retry.max_backoff_ms = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::PAGE_SIZE) {
            config.page_size = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::PURGE_AFTER_MS) {
            config.purge_after_ms = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::invalid_argument("page_size must be greater than zero"));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(Error::invalid_argument(
                "retry.max_backoff_ms must not be smaller than retry.initial_backoff_ms",
            ));
        }
        Ok(())
    }

    pub fn purge_after(&self) -> Duration {
        Duration::from_millis(self.purge_after_ms)
    }
}

/// Document store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory` or `redb`.
    pub backend: String,
    /// Database file for persistent backends.
    pub path: String,
    /// Create parent directories if they don't exist.
    pub create_dirs: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: defaults::STORAGE_BACKEND.to_string(),
            path: defaults::STORAGE_PATH.to_string(),
            create_dirs: true,
        }
    }
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn redb(path: impl Into<String>) -> Self {
        Self {
            backend: "redb".to_string(),
            path: path.into(),
            create_dirs: true,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(backend) = lookup(env_vars::STORAGE_BACKEND) {
            config.backend = backend.trim().to_lowercase();
        }
        if let Some(path) = lookup(env_vars::STORAGE_PATH) {
            config.path = path;
        }
        config
    }
}

//! Service configuration.
//!
//! Configuration is a JSON document where every field is optional:
//!
//! ```json
//! {
//!   "bind_addr": "0.0.0.0:8787",
//!   "rate_limit": { "max_requests": 100, "window_ms": 60000, "cleanup_interval_secs": 60 },
//!   "cache": { "memory_capacity": 1000 }
//! }
//! ```
//!
//! After loading, [`EdgeConfig::apply_env_overrides`] lets deployments override
//! the bind address (`SCROBBLE_EDGE_BIND`) and request limit
//! (`SCROBBLE_EDGE_RATE_LIMIT`) without shipping a file.

use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;
use thiserror::Error;

use crate::cache::MemoryBackend;
use crate::security::RateLimiter;

pub const BIND_ENV: &str = "SCROBBLE_EDGE_BIND";
pub const RATE_LIMIT_ENV: &str = "SCROBBLE_EDGE_RATE_LIMIT";

/// Longest accepted rate-limit window (one day).
const MAX_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: RateLimiter::DEFAULT_MAX_REQUESTS,
            window_ms: RateLimiter::DEFAULT_WINDOW_MS as u64,
            cleanup_interval_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.window_ms.min(MAX_WINDOW_MS) as i64)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn build(&self) -> RateLimiter {
        RateLimiter::new(self.max_requests, self.window())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: MemoryBackend::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EdgeConfig {
    pub bind_addr: String,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EdgeConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Applies `SCROBBLE_EDGE_*` variables from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable source, then re-validates.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(BIND_ENV) {
            self.bind_addr = bind;
        }
        if let Some(limit) = lookup(RATE_LIMIT_ENV) {
            self.rate_limit.max_requests =
                limit.trim().parse().map_err(|e| ConfigError::Invalid {
                    field: "rate_limit.max_requests",
                    reason: format!("{RATE_LIMIT_ENV}={limit:?}: {e}"),
                })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };

        if self.bind_addr.trim().is_empty() {
            return Err(invalid("bind_addr", "must not be empty"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(invalid("rate_limit.max_requests", "must be at least 1"));
        }
        if self.rate_limit.window_ms == 0 || self.rate_limit.window_ms > MAX_WINDOW_MS {
            return Err(invalid("rate_limit.window_ms", "must be between 1 and 86400000"));
        }
        if self.rate_limit.cleanup_interval_secs == 0 {
            return Err(invalid("rate_limit.cleanup_interval_secs", "must be at least 1"));
        }
        if self.cache.memory_capacity == 0 {
            return Err(invalid("cache.memory_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EdgeConfig::from_json("{}").unwrap();
        assert_eq!(config, EdgeConfig::default());
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window(), TimeDelta::minutes(1));
        assert_eq!(config.cache.memory_capacity, 1000);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = EdgeConfig::from_json(r#"{ "rate_limit": { "max_requests": 30 } }"#).unwrap();
        assert_eq!(config.rate_limit.max_requests, 30);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.bind_addr, "127.0.0.1:8787");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = EdgeConfig::from_json(r#"{ "cache": { "ttl": 5 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_window_is_invalid() {
        let err = EdgeConfig::from_json(r#"{ "rate_limit": { "window_ms": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "rate_limit.window_ms", .. }));
    }

    #[test]
    fn overrides_replace_bind_and_limit() {
        let config = EdgeConfig::default()
            .apply_overrides(|name| match name {
                BIND_ENV => Some("0.0.0.0:9000".to_string()),
                RATE_LIMIT_ENV => Some(" 250 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.rate_limit.build().max_requests(), 250);
    }

    #[test]
    fn malformed_override_is_reported() {
        let err = EdgeConfig::default()
            .apply_overrides(|name| (name == RATE_LIMIT_ENV).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("rate_limit.max_requests"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EdgeConfig::from_file("/nonexistent/scrobble-edge.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

//! Server Configuration
//!
//! Settings are read from environment variables once at startup. Missing
//! variables take their defaults; a present but unparsable value is an error
//! rather than a silent default.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::backends::{MemoryCacheConfig, RedisCacheConfig};
use crate::cache_manager::{BackendMode, CacheManagerConfig};
use crate::rate_limit::IdentifierSource;

/// Configuration errors, raised at load time only
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Fallback log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub backend: BackendMode,
    pub redis_url: String,
    pub redis_max_connections: usize,
    pub redis_socket_timeout: Duration,
    pub l1_max_entries: usize,
    pub l1_max_memory_mb: usize,
    pub enable_stampede_prevention: bool,
    pub cleanup_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: BackendMode::Memory,
            redis_url: "redis://localhost:6379/0".to_string(),
            redis_max_connections: 10,
            redis_socket_timeout: Duration::from_secs(5),
            l1_max_entries: 1000,
            l1_max_memory_mb: 100,
            enable_stampede_prevention: true,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheSettings {
    /// Manager configuration derived from these settings
    #[must_use]
    pub fn manager_config(&self) -> CacheManagerConfig {
        CacheManagerConfig {
            mode: self.backend,
            tier1: MemoryCacheConfig::new(self.l1_max_entries, self.l1_max_memory_mb),
            redis: RedisCacheConfig {
                url: self.redis_url.clone(),
                max_connections: self.redis_max_connections,
                socket_timeout: self.redis_socket_timeout,
                ..RedisCacheConfig::default()
            },
            stampede_prevention: self.enable_stampede_prevention,
            ..CacheManagerConfig::default()
        }
    }
}

/// Rate-limit gate settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests: u32,
    pub window_seconds: u64,
    pub identifier: IdentifierSource,
    /// Path prefixes that bypass the gate
    pub exclude_paths: Vec<String>,
    pub use_redis: bool,
    pub redis_url: String,
    pub include_headers: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 100,
            window_seconds: 60,
            identifier: IdentifierSource::Ip,
            exclude_paths: vec!["/health".to_string(), "/".to_string()],
            use_redis: false,
            redis_url: "redis://localhost:6379/0".to_string(),
            include_headers: true,
        }
    }
}

impl RateLimitSettings {
    /// A path is excluded when it equals a listed prefix or sits below it
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths.iter().any(|prefix| {
            if path == prefix {
                return true;
            }
            // "/" only ever matches the root itself
            let base = prefix.trim_end_matches('/');
            !base.is_empty() && path.strip_prefix(base).is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Complete process configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
}

impl Settings {
    /// Load from the process environment
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for any unparsable or invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for any unparsable or invalid value.
    ///
    /// # Example
    ///
    /// ```rust
    /// use briefing_cache::config::Settings;
    /// use std::collections::HashMap;
    ///
    /// let vars = HashMap::from([("RATE_LIMIT_REQUESTS", "5")]);
    /// let settings = Settings::from_lookup(|var| vars.get(var).map(ToString::to_string)).unwrap();
    /// assert_eq!(settings.rate_limit.requests, 5);
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let server_defaults = ServerSettings::default();
        let cache_defaults = CacheSettings::default();
        let limit_defaults = RateLimitSettings::default();

        let server = ServerSettings {
            host: env.string("HOST", &server_defaults.host),
            port: env.parse("PORT", server_defaults.port)?,
            log_level: env.string("LOG_LEVEL", &server_defaults.log_level),
        };

        let cache = CacheSettings {
            backend: env.parse("CACHE_BACKEND", cache_defaults.backend)?,
            redis_url: env.string("CACHE_REDIS_URL", &cache_defaults.redis_url),
            redis_max_connections: env.parse("CACHE_REDIS_MAX_CONNECTIONS", cache_defaults.redis_max_connections)?,
            redis_socket_timeout: env.seconds("CACHE_REDIS_SOCKET_TIMEOUT", cache_defaults.redis_socket_timeout)?,
            l1_max_entries: env.parse("CACHE_L1_MAX_ENTRIES", cache_defaults.l1_max_entries)?,
            l1_max_memory_mb: env.parse("CACHE_L1_MAX_MEMORY_MB", cache_defaults.l1_max_memory_mb)?,
            enable_stampede_prevention: env.flag(
                "CACHE_ENABLE_STAMPEDE_PREVENTION",
                cache_defaults.enable_stampede_prevention,
            )?,
            cleanup_interval: Duration::from_secs(
                env.parse("CACHE_CLEANUP_INTERVAL_SECONDS", cache_defaults.cleanup_interval.as_secs())?,
            ),
        };

        let rate_limit = RateLimitSettings {
            enabled: env.flag("RATE_LIMIT_ENABLED", limit_defaults.enabled)?,
            requests: env.parse("RATE_LIMIT_REQUESTS", limit_defaults.requests)?,
            window_seconds: env.parse("RATE_LIMIT_WINDOW_SECONDS", limit_defaults.window_seconds)?,
            identifier: env.parse("RATE_LIMIT_IDENTIFIER", limit_defaults.identifier)?,
            exclude_paths: env.list("RATE_LIMIT_EXCLUDE_PATHS", limit_defaults.exclude_paths),
            use_redis: env.flag("RATE_LIMIT_USE_REDIS", limit_defaults.use_redis)?,
            redis_url: env.string("RATE_LIMIT_REDIS_URL", &cache.redis_url),
            include_headers: env.flag("RATE_LIMIT_INCLUDE_HEADERS", limit_defaults.include_headers)?,
        };

        let settings = Self {
            server,
            cache,
            rate_limit,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings no component can run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::Invalid { reason: reason.to_string() });

        if self.cache.l1_max_entries == 0 {
            return invalid("CACHE_L1_MAX_ENTRIES must be at least 1");
        }
        if self.cache.l1_max_memory_mb == 0 {
            return invalid("CACHE_L1_MAX_MEMORY_MB must be at least 1");
        }
        if self.cache.redis_max_connections == 0 {
            return invalid("CACHE_REDIS_MAX_CONNECTIONS must be at least 1");
        }
        if self.cache.redis_socket_timeout.is_zero() {
            return invalid("CACHE_REDIS_SOCKET_TIMEOUT must be positive");
        }
        if self.cache.cleanup_interval.is_zero() {
            return invalid("CACHE_CLEANUP_INTERVAL_SECONDS must be at least 1");
        }
        if self.rate_limit.requests == 0 {
            return invalid("RATE_LIMIT_REQUESTS must be at least 1");
        }
        if self.rate_limit.window_seconds == 0 {
            return invalid("RATE_LIMIT_WINDOW_SECONDS must be at least 1");
        }
        Ok(())
    }
}

/// Typed access to environment-style variables
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset
    fn raw(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.raw(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(var) {
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                var,
                reason: e.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.raw(var) else {
            return Ok(default);
        };

        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                var,
                value,
                reason: "expected true/false, 1/0, yes/no or on/off".to_string(),
            }),
        }
    }

    /// Fractional seconds, e.g. `2.5`
    fn seconds(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let Some(value) = self.raw(var) else {
            return Ok(default);
        };

        let parsed = value.parse::<f64>().ok().filter(|secs| *secs > 0.0);
        parsed
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| ConfigError::InvalidValue {
                var,
                value,
                reason: "expected a positive number of seconds".to_string(),
            })
    }

    /// Comma-separated list; present but blank means empty
    fn list(&self, var: &str, default: Vec<String>) -> Vec<String> {
        match (self.lookup)(var) {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(ToString::to_string)
                .collect(),
            None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        Settings::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = load(&[]).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.cache.backend, BackendMode::Memory);
        assert_eq!(settings.rate_limit.exclude_paths, vec!["/health", "/"]);
        assert_eq!(settings.rate_limit.redis_url, settings.cache.redis_url);
    }

    #[test]
    fn test_overrides() {
        let settings = load(&[
            ("CACHE_BACKEND", "layered"),
            ("CACHE_REDIS_URL", "redis://cache:6379/1"),
            ("CACHE_REDIS_SOCKET_TIMEOUT", "2.5"),
            ("CACHE_ENABLE_STAMPEDE_PREVENTION", "off"),
            ("RATE_LIMIT_IDENTIFIER", "api_key"),
            ("RATE_LIMIT_EXCLUDE_PATHS", " /health , /docs ,"),
            ("RATE_LIMIT_INCLUDE_HEADERS", "No"),
        ])
        .unwrap();

        assert_eq!(settings.cache.backend, BackendMode::Layered);
        assert_eq!(settings.cache.redis_socket_timeout, Duration::from_millis(2500));
        assert!(!settings.cache.enable_stampede_prevention);
        assert_eq!(settings.rate_limit.identifier, IdentifierSource::ApiKey);
        assert_eq!(settings.rate_limit.exclude_paths, vec!["/health", "/docs"]);
        assert!(!settings.rate_limit.include_headers);
        assert_eq!(settings.rate_limit.redis_url, "redis://cache:6379/1");
    }

    #[test]
    fn test_unparsable_value_is_an_error() {
        let err = load(&[("RATE_LIMIT_REQUESTS", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "RATE_LIMIT_REQUESTS", .. }));

        let err = load(&[("RATE_LIMIT_ENABLED", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "RATE_LIMIT_ENABLED", .. }));

        let err = load(&[("CACHE_REDIS_SOCKET_TIMEOUT", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        assert!(matches!(load(&[("RATE_LIMIT_REQUESTS", "0")]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(load(&[("RATE_LIMIT_WINDOW_SECONDS", "0")]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(load(&[("CACHE_L1_MAX_ENTRIES", "0")]), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_excluded_paths() {
        let settings = RateLimitSettings {
            exclude_paths: vec!["/health".to_string(), "/".to_string(), "/docs/".to_string()],
            ..RateLimitSettings::default()
        };

        assert!(settings.is_excluded("/"));
        assert!(settings.is_excluded("/health"));
        assert!(settings.is_excluded("/health/live"));
        assert!(settings.is_excluded("/docs/index.html"));
        assert!(!settings.is_excluded("/healthz"));
        assert!(!settings.is_excluded("/cache/stats"));
    }
}

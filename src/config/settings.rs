//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Sandbox root for resources and file-reading tools.
    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,

    /// Directory of tool manifests. Built-in tools are used when unset.
    #[serde(default)]
    pub tools_dir: Option<PathBuf>,

    /// Directory of prompt templates.
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    /// Resource cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Worker-pool size for tool, resource and prompt requests.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Optional per-request deadline in seconds.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Live-reload settings.
    #[serde(default)]
    pub hot_reload: HotReloadConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            _schema: None,
            _comment: None,
            resource_dir: default_resource_dir(),
            tools_dir: None,
            prompts_dir: default_prompts_dir(),
            cache: CacheConfig::default(),
            workers: default_workers(),
            request_timeout_secs: None,
            hot_reload: HotReloadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::ValidationError {
                message: message.to_string(),
            })
        };

        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.cache.max_bytes == 0 {
            return invalid("cache.max_bytes must be greater than 0");
        }
        if self.cache.max_resource_size == 0 {
            return invalid("cache.max_resource_size must be greater than 0");
        }
        if self.request_timeout_secs == Some(0) {
            return invalid("request_timeout_secs must be greater than 0");
        }
        if self.hot_reload.debounce_ms == 0 {
            return invalid("hot_reload.debounce_ms must be greater than 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            });
        }
        Ok(())
    }

    /// The request deadline, if one is configured.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

fn default_resource_dir() -> PathBuf {
    PathBuf::from("./resources")
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("./prompts")
}

const fn default_workers() -> usize {
    4
}

/// Resource cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Upper bound on cached content, in bytes. Default: 8 MiB.
    #[serde(default = "default_cache_bytes")]
    pub max_bytes: usize,

    /// Largest resource that may be served, in bytes. Default: 10 MiB.
    #[serde(default = "default_max_resource_size")]
    pub max_resource_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_cache_bytes(),
            max_resource_size: default_max_resource_size(),
        }
    }
}

const fn default_cache_bytes() -> usize {
    8 * 1024 * 1024
}

const fn default_max_resource_size() -> u64 {
    10 * 1024 * 1024
}

/// Live-reload configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HotReloadConfig {
    /// Watch the tool, resource and prompt directories.
    #[serde(default)]
    pub enabled: bool,

    /// Quiet period before a burst of changes is applied, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl HotReloadConfig {
    /// The debounce window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

const fn default_debounce_ms() -> u64 {
    250
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.resource_dir, PathBuf::from("./resources"));
        assert_eq!(config.workers, 4);
        assert!(config.tools_dir.is_none());
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "resource_dir": "/srv/resources",
            "tools_dir": "/srv/tools",
            "prompts_dir": "/srv/prompts",
            "cache": {
                "max_bytes": 1024,
                "max_resource_size": 2048
            },
            "workers": 2,
            "request_timeout_secs": 30,
            "hot_reload": {
                "enabled": true,
                "debounce_ms": 100
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.resource_dir, PathBuf::from("/srv/resources"));
        assert_eq!(config.tools_dir, Some(PathBuf::from("/srv/tools")));
        assert_eq!(config.cache.max_bytes, 1024);
        assert_eq!(config.cache.max_resource_size, 2048);
        assert_eq!(config.workers, 2);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert!(config.hot_reload.enabled);
        assert_eq!(config.hot_reload.debounce(), Duration::from_millis(100));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_bytes, 8 * 1024 * 1024);
        assert_eq!(config.max_resource_size, 10 * 1024 * 1024);
    }

    #[test]
    fn hot_reload_defaults() {
        let config = HotReloadConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.debounce_ms, 250);
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_zero_workers() {
        let config: Config = serde_json::from_str(r#"{"workers": 0}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_cache() {
        let config: Config = serde_json::from_str(r#"{"cache": {"max_bytes": 0}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_invalid_log_level() {
        let config: Config = serde_json::from_str(r#"{"logging": {"level": "loud"}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}

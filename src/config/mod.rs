//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk and parsing
//! it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! The configuration file is searched in the following order:
//!
//! 1. Path given as the CLI's positional argument (must exist)
//! 2. Default location (optional, defaults apply when absent):
//!    - **Linux/macOS:** `~/.mcp-learning-server/config.json`
//!    - **Windows:** `%USERPROFILE%\.mcp-learning-server\config.json`

mod settings;

pub use settings::{CacheConfig, Config, HotReloadConfig, LoggingConfig};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.mcp-learning-server/`
/// - **Windows:** `%USERPROFILE%\.mcp-learning-server\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".mcp-learning-server"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Loads and parses the configuration file.
///
/// If `path` is `None`, uses the platform-specific default location and
/// falls back to [`Config::default`] when no file exists there.
///
/// # Errors
///
/// Returns an error if:
/// - An explicitly given configuration file does not exist
/// - The file cannot be read
/// - The JSON is malformed
/// - A field is invalid
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound {
                    path: p.to_path_buf(),
                });
            }
            p.to_path_buf()
        }
        None => match default_config_path() {
            Some(p) if p.exists() => p,
            _ => {
                tracing::debug!("No configuration file found, using defaults");
                return Ok(Config::default());
            }
        },
    };

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: config_path.clone(),
        source: e,
    })?;

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_dir_exists() {
        assert!(default_config_dir().is_some());
    }

    #[test]
    fn default_config_path_exists() {
        let path = default_config_path();
        assert!(path.is_some());
        assert!(path.unwrap().to_string_lossy().contains("config.json"));
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("missing.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn loads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, r#"{"workers": 8}"#).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().workers, 8);

        std::fs::write(&path, r#"{"workers": 0}"#).unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::ValidationError { .. })
        ));

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::ParseError { .. })
        ));
    }
}

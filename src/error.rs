//! Error types for mcp-learning-server.
//!
//! Request-level failures are reported to the client and never end the
//! session; see [`crate::mcp::McpError`]. The types here cover the process
//! boundary: configuration problems and failures that stop the server.

use std::path::PathBuf;

use thiserror::Error;

use crate::prompts::PromptError;
use crate::resources::{ResourceError, SandboxError};
use crate::tools::RegistryError;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors that stop the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The sandbox root is missing or unusable.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The initial tool set could not be built.
    #[error("failed to load tools: {0}")]
    Tools(#[from] RegistryError),

    /// The initial resource index could not be loaded.
    #[error("failed to load resources: {0}")]
    Resources(#[from] ResourceError),

    /// The initial prompt set could not be loaded.
    #[error("failed to load prompts: {0}")]
    Prompts(#[from] PromptError),

    /// The directory watcher could not be started.
    #[error("failed to start file watcher: {0}")]
    Watcher(#[from] notify::Error),

    /// The transport failed while serving.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl ServerError {
    /// Returns `true` for failures that happen before the server starts
    /// serving, as opposed to a transport failing mid-session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::ValidationError {
            message: "invalid setting".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("invalid setting"));
    }

    #[test]
    fn startup_errors_are_fatal() {
        let error = ServerError::from(SandboxError::RootNotDirectory(PathBuf::from("/x")));
        assert!(error.is_fatal());

        let error = ServerError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(!error.is_fatal());
    }
}

//! Published snapshots and live reload.
//!
//! Every registry is an immutable value behind a [`Published`] cell.
//! Readers take an `Arc` to the current snapshot and keep using it for the
//! whole request; a reload builds a complete replacement off to the side
//! and swaps the pointer. A rebuild that fails leaves the old snapshot in
//! place.
//!
//! ```text
//!   watcher thread ──▶ Reloader::reload_* ──▶ build new snapshot
//!                                                  │ ok
//!                                                  ▼
//!   dispatch ──load()──▶ Published<T> ◀──swap()── Arc<T>
//!                                                  │
//!                                                  ▼
//!                                       ReloadEvent ──▶ list_changed
//! ```

pub mod watcher;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::Config;
use crate::error::ServerError;
use crate::prompts::{PromptError, PromptRegistry};
use crate::resources::{CacheLimits, ResourceCatalog, ResourceError, ResourceIndex, Sandbox};
use crate::tools::{self, RegistryError, ToolContext, ToolRegistry};

pub use watcher::ReloadWatcher;

/// A snapshot cell: readers clone the current `Arc`, writers replace it.
pub struct Published<T> {
    current: RwLock<Arc<T>>,
}

impl<T> Published<T> {
    /// Publishes an initial snapshot.
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    /// Returns the current snapshot.
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the snapshot, returning the previous one.
    pub fn swap(&self, value: T) -> Arc<T> {
        let next = Arc::new(value);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    /// Replaces the snapshot.
    pub fn store(&self, value: T) {
        drop(self.swap(value));
    }
}

impl<T: fmt::Debug> fmt::Debug for Published<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Published").field(&self.load()).finish()
    }
}

/// Which registry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadEvent {
    /// A new tool snapshot was published.
    Tools,
    /// A new resource index was published.
    Resources,
    /// A new prompt snapshot was published.
    Prompts,
}

impl ReloadEvent {
    /// Method family used in `notifications/<family>/list_changed`.
    #[must_use]
    pub const fn family(self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Resources => "resources",
            Self::Prompts => "prompts",
        }
    }
}

/// A rebuild that was discarded.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The tool rebuild failed.
    #[error("tool reload failed: {0}")]
    Tools(#[from] RegistryError),
    /// The resource index rebuild failed.
    #[error("resource reload failed: {0}")]
    Resources(#[from] ResourceError),
    /// The prompt rebuild failed.
    #[error("prompt reload failed: {0}")]
    Prompts(#[from] PromptError),
}

/// The three published registries and the tool context they share.
#[derive(Debug)]
pub struct Registries {
    /// Tool snapshot.
    pub tools: Published<ToolRegistry>,
    /// Resource catalog (index snapshot plus shared cache).
    pub resources: ResourceCatalog,
    /// Prompt snapshot.
    pub prompts: Published<PromptRegistry>,
    context: ToolContext,
}

impl Registries {
    /// Assembles registries from already-built parts.
    #[must_use]
    pub fn new(tools: ToolRegistry, resources: ResourceCatalog, prompts: PromptRegistry) -> Self {
        let context = ToolContext::new(Arc::clone(resources.sandbox()));
        Self {
            tools: Published::new(tools),
            resources,
            prompts: Published::new(prompts),
            context,
        }
    }

    /// Builds the startup snapshots described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sandbox root is missing or any initial
    /// snapshot is invalid.
    pub fn load(config: &Config) -> Result<Self, ServerError> {
        let sandbox = Arc::new(Sandbox::new(&config.resource_dir)?);
        let index = ResourceIndex::load(sandbox.root())?;
        let catalog = ResourceCatalog::new(
            sandbox,
            index,
            CacheLimits {
                max_bytes: config.cache.max_bytes,
                max_resource_size: config.cache.max_resource_size,
            },
        );
        let tools = tools::load(config.tools_dir.as_deref())?;
        let prompts = PromptRegistry::load_dir(&config.prompts_dir)?;

        tracing::info!(
            tools = tools.len(),
            resources = catalog.index().len(),
            prompts = prompts.len(),
            "Registries loaded"
        );
        Ok(Self::new(tools, catalog, prompts))
    }

    /// Context handed to tool handlers.
    #[must_use]
    pub const fn tool_context(&self) -> &ToolContext {
        &self.context
    }
}

/// Rebuilds registries from their source directories and publishes them.
#[derive(Debug, Clone)]
pub struct Reloader {
    registries: Arc<Registries>,
    tools_dir: Option<PathBuf>,
    prompts_dir: PathBuf,
    events: Option<UnboundedSender<ReloadEvent>>,
}

impl Reloader {
    /// Creates a reloader for the directories named in `config`.
    #[must_use]
    pub fn new(registries: Arc<Registries>, config: &Config) -> Self {
        Self {
            registries,
            tools_dir: config.tools_dir.clone(),
            prompts_dir: config.prompts_dir.clone(),
            events: None,
        }
    }

    /// Reports every successful swap on `events`.
    #[must_use]
    pub fn with_events(mut self, events: UnboundedSender<ReloadEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Directories whose changes should trigger a reload.
    #[must_use]
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.resource_dir().to_path_buf(), self.prompts_dir.clone()];
        if let Some(tools_dir) = &self.tools_dir {
            dirs.push(tools_dir.clone());
        }
        dirs
    }

    /// The sandbox root.
    #[must_use]
    pub fn resource_dir(&self) -> &Path {
        self.registries.resources.sandbox().root()
    }

    /// The configured prompts directory.
    #[must_use]
    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    /// The configured tools directory, if any.
    #[must_use]
    pub fn tools_dir(&self) -> Option<&Path> {
        self.tools_dir.as_deref()
    }

    /// Rebuilds and publishes the tool snapshot. Returns the tool count.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the old snapshot published, if any
    /// definition is invalid.
    pub fn reload_tools(&self) -> Result<usize, ReloadError> {
        let next = tools::load(self.tools_dir.as_deref()).inspect_err(|e| {
            tracing::warn!(error = %e, "Tool reload rejected, keeping previous snapshot");
        })?;
        let count = next.len();
        self.registries.tools.store(next);
        tracing::info!(count, "Tools reloaded");
        self.notify(ReloadEvent::Tools);
        Ok(count)
    }

    /// Rebuilds the resource index, publishes it and invalidates affected
    /// cache entries. Returns the number of invalidated entries.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the old index published, if the index
    /// file is malformed.
    pub fn reload_resources(&self, changed: &[PathBuf]) -> Result<usize, ReloadError> {
        let catalog = &self.registries.resources;
        let next = ResourceIndex::load(catalog.sandbox().root()).inspect_err(|e| {
            tracing::warn!(error = %e, "Resource reload rejected, keeping previous index");
        })?;
        let count = next.len();
        let invalidated = catalog.replace_index(next, changed);
        tracing::info!(count, invalidated, "Resources reloaded");
        self.notify(ReloadEvent::Resources);
        Ok(invalidated)
    }

    /// Rebuilds and publishes the prompt snapshot. Returns the prompt count.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the old snapshot published, if any prompt
    /// is invalid.
    pub fn reload_prompts(&self) -> Result<usize, ReloadError> {
        let next = PromptRegistry::load_dir(&self.prompts_dir).inspect_err(|e| {
            tracing::warn!(error = %e, "Prompt reload rejected, keeping previous snapshot");
        })?;
        let count = next.len();
        self.registries.prompts.store(next);
        tracing::info!(count, "Prompts reloaded");
        self.notify(ReloadEvent::Prompts);
        Ok(count)
    }

    fn notify(&self, event: ReloadEvent) {
        if let Some(events) = &self.events {
            // The receiver is gone once the session has ended.
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn swap_returns_previous_and_readers_keep_old() {
        let cell = Published::new(vec![1, 2, 3]);
        let before = cell.load();
        let old = cell.swap(vec![4]);
        assert_eq!(*old, vec![1, 2, 3]);
        assert_eq!(*before, vec![1, 2, 3]);
        assert_eq!(*cell.load(), vec![4]);
    }

    fn fixture() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let resources = dir.path().join("resources");
        let prompts = dir.path().join("prompts");
        let tools = dir.path().join("tools");
        for d in [&resources, &prompts, &tools] {
            std::fs::create_dir(d).unwrap();
        }
        std::fs::write(resources.join("a.txt"), "alpha").unwrap();
        std::fs::write(
            resources.join("index.json"),
            json!({"a": {"path": "a.txt"}}).to_string(),
        )
        .unwrap();
        std::fs::write(
            tools.join("tools.json"),
            json!([{"name": "say", "handler": "echo",
                    "parameters": {"type": "object", "properties": {"message": {"type": "string"}}}}])
            .to_string(),
        )
        .unwrap();

        let config: Config = serde_json::from_value(json!({
            "resource_dir": resources,
            "prompts_dir": prompts,
            "tools_dir": tools,
        }))
        .unwrap();
        (dir, config)
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let (_dir, config) = fixture();
        let registries = Arc::new(Registries::load(&config).unwrap());
        let reloader = Reloader::new(Arc::clone(&registries), &config);
        assert_eq!(registries.tools.load().len(), 1);

        let tools_dir = config.tools_dir.clone().unwrap();
        std::fs::write(tools_dir.join("zz.json"), r#"{"name": "say", "handler": "echo"}"#).unwrap();
        assert!(matches!(
            reloader.reload_tools(),
            Err(ReloadError::Tools(RegistryError::DuplicateName(_)))
        ));
        assert_eq!(registries.tools.load().names().collect::<Vec<_>>(), ["say"]);

        std::fs::remove_file(tools_dir.join("zz.json")).unwrap();
        std::fs::write(tools_dir.join("more.json"), r#"{"name": "calc", "handler": "calculator"}"#)
            .unwrap();
        assert_eq!(reloader.reload_tools().unwrap(), 2);
    }

    #[test]
    fn resource_reload_invalidates_changed_file_and_notifies() {
        let (_dir, config) = fixture();
        let registries = Arc::new(Registries::load(&config).unwrap());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reloader = Reloader::new(Arc::clone(&registries), &config).with_events(tx);

        registries.resources.read("a").unwrap();
        assert_eq!(registries.resources.cache_stats().entries, 1);

        let changed = vec![config.resource_dir.join("a.txt")];
        assert_eq!(reloader.reload_resources(&changed).unwrap(), 1);
        assert_eq!(registries.resources.cache_stats().entries, 0);
        assert_eq!(rx.try_recv().unwrap(), ReloadEvent::Resources);
    }

    #[test]
    fn prompt_reload_publishes_new_set() {
        let (_dir, config) = fixture();
        let registries = Arc::new(Registries::load(&config).unwrap());
        let reloader = Reloader::new(Arc::clone(&registries), &config);
        assert!(registries.prompts.load().is_empty());

        std::fs::write(
            config.prompts_dir.join("hello.json"),
            r#"{"template": "Hello {{name}}", "parameters": [{"name": "name", "required": true}]}"#,
        )
        .unwrap();
        assert_eq!(reloader.reload_prompts().unwrap(), 1);
        assert!(registries.prompts.load().get("hello").is_some());
    }
}

//! Resource catalog: named, read-only content backed by sandboxed files.
//!
//! Resources are declared in `<resource_dir>/index.json`:
//!
//! ```json
//! {
//!   "python_basics": {
//!     "path": "docs/python_basics.md",
//!     "title": "Python Basics",
//!     "description": "Introductory notes",
//!     "mime_type": "text/markdown",
//!     "tags": ["python", "tutorial"]
//!   }
//! }
//! ```
//!
//! The index is an immutable snapshot swapped on reload. Content is read on
//! demand through the [`Sandbox`], bounded by a maximum file size, and kept
//! in a shared [`ContentCache`] keyed by resource id.

pub mod cache;
pub mod sandbox;
pub mod source;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::reload::Published;

pub use cache::{CacheStats, ContentCache};
pub use sandbox::{Sandbox, SandboxError};
pub use source::{ContentSource, FileMetadata, FsSource};

/// Name of the index file inside the resource directory.
pub const INDEX_FILE: &str = "index.json";

/// Default MIME type for entries that do not declare one.
pub const DEFAULT_MIME_TYPE: &str = "text/plain";

/// Errors raised by the resource catalog.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// No resource with this id is declared.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The declared path was denied by the sandbox or does not exist.
    #[error("cannot access resource '{id}': {source}")]
    Access {
        /// Resource id.
        id: String,
        /// Sandbox decision.
        #[source]
        source: SandboxError,
    },

    /// The backing file could not be read.
    #[error("error reading resource '{id}': {source}")]
    Io {
        /// Resource id.
        id: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The backing file exceeds the configured size limit.
    #[error("resource '{id}' is too large: {size} bytes (max: {limit} bytes)")]
    TooLarge {
        /// Resource id.
        id: String,
        /// File size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// The index file is malformed.
    #[error("invalid resource index {path}: {message}")]
    Index {
        /// Index file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
}

/// A declared resource. Content is not part of the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    /// Unique id.
    pub id: String,
    /// Path relative to the sandbox root.
    pub path: String,
    /// Display title.
    pub title: String,
    /// Description.
    pub description: String,
    /// MIME type.
    pub mime_type: String,
    /// Tags.
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexRecord {
    path: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "mimeType")]
    mime_type: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Immutable snapshot of declared resources, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIndex {
    entries: IndexMap<String, ResourceEntry>,
}

impl ResourceIndex {
    /// Loads `<root>/index.json`. A missing index yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Index`] if the file cannot be read or parsed,
    /// or declares an entry with an empty path.
    pub fn load(root: &Path) -> Result<Self, ResourceError> {
        let path = root.join(INDEX_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Resource index not found");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ResourceError::Index {
                    path,
                    message: e.to_string(),
                })
            }
        };
        let index = Self::from_json(&text).map_err(|message| ResourceError::Index {
            path: path.clone(),
            message,
        })?;
        tracing::info!(count = index.len(), "Loaded resource index");
        Ok(index)
    }

    /// Parses index JSON text.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn from_json(text: &str) -> Result<Self, String> {
        let records: IndexMap<String, IndexRecord> =
            serde_json::from_str(text).map_err(|e| e.to_string())?;

        let mut entries = IndexMap::with_capacity(records.len());
        for (id, record) in records {
            if record.path.trim().is_empty() {
                return Err(format!("resource '{id}' has an empty path"));
            }
            let entry = ResourceEntry {
                title: record.title.unwrap_or_else(|| id.clone()),
                id: id.clone(),
                path: record.path,
                description: record.description,
                mime_type: record
                    .mime_type
                    .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
                tags: record.tags,
            };
            entries.insert(id, entry);
        }
        Ok(Self { entries })
    }

    /// Builds a snapshot directly from entries.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = ResourceEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Looks up an entry by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceEntry> {
        self.entries.get(id)
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.values()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Optional filters for `resources/list`. All given filters must match.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceFilter {
    /// Path prefix (by path component) on the entry path.
    #[serde(default)]
    pub directory: Option<String>,
    /// Required tag.
    #[serde(default)]
    pub tag: Option<String>,
    /// Exact MIME type.
    #[serde(default, alias = "mimeType")]
    pub mime_type: Option<String>,
    /// Case-insensitive substring of id, title or description.
    #[serde(default)]
    pub query: Option<String>,
}

impl ResourceFilter {
    /// Returns `true` if `entry` satisfies every filter that is set.
    #[must_use]
    pub fn matches(&self, entry: &ResourceEntry) -> bool {
        if let Some(directory) = &self.directory {
            let directory = directory.trim_start_matches("./");
            if !Path::new(entry.path.trim_start_matches("./")).starts_with(directory) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !entry.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(mime_type) = &self.mime_type {
            if &entry.mime_type != mime_type {
                return false;
            }
        }
        if let Some(query) = &self.query {
            let query = query.to_lowercase();
            let found = [&entry.id, &entry.title, &entry.description]
                .iter()
                .any(|field| field.to_lowercase().contains(&query));
            if !found {
                return false;
            }
        }
        true
    }
}

/// Content returned by [`ResourceCatalog::read`].
#[derive(Debug, Clone)]
pub struct ResourceContent {
    /// The entry that was read.
    pub entry: ResourceEntry,
    /// Raw bytes.
    pub bytes: Arc<[u8]>,
}

impl ResourceContent {
    /// The content as text, if it is valid UTF-8.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// `resources/read` result: `content` for text, base64 `blob` otherwise.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "id": self.entry.id,
            "title": self.entry.title,
            "mimeType": self.entry.mime_type,
            "size": self.bytes.len(),
        });
        if let Value::Object(map) = &mut value {
            match self.text() {
                Some(text) => map.insert("content".to_string(), Value::String(text.to_string())),
                None => map.insert("blob".to_string(), Value::String(STANDARD.encode(&self.bytes))),
            };
        }
        value
    }
}

/// Size limits applied by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Cache bound in bytes.
    pub max_bytes: usize,
    /// Largest file that may be served.
    pub max_resource_size: u64,
}

/// The resource catalog: sandbox, published index snapshot and shared cache.
#[derive(Debug)]
pub struct ResourceCatalog {
    sandbox: Arc<Sandbox>,
    source: Arc<dyn ContentSource>,
    index: Published<ResourceIndex>,
    cache: ContentCache,
    max_resource_size: u64,
}

impl ResourceCatalog {
    /// Creates a catalog reading from the local file system.
    #[must_use]
    pub fn new(sandbox: Arc<Sandbox>, index: ResourceIndex, limits: CacheLimits) -> Self {
        Self::with_source(sandbox, index, limits, Arc::new(FsSource))
    }

    /// Creates a catalog reading through `source`.
    #[must_use]
    pub fn with_source(
        sandbox: Arc<Sandbox>,
        index: ResourceIndex,
        limits: CacheLimits,
        source: Arc<dyn ContentSource>,
    ) -> Self {
        Self {
            sandbox,
            source,
            index: Published::new(index),
            cache: ContentCache::new(limits.max_bytes),
            max_resource_size: limits.max_resource_size,
        }
    }

    /// The sandbox shared with file-reading tools.
    #[must_use]
    pub const fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    /// The currently published index snapshot.
    #[must_use]
    pub fn index(&self) -> Arc<ResourceIndex> {
        self.index.load()
    }

    /// Entries matching `filter`, in declaration order.
    #[must_use]
    pub fn list(&self, filter: &ResourceFilter) -> Vec<ResourceEntry> {
        self.index
            .load()
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect()
    }

    /// Reads a resource, serving from the cache while the backing file's
    /// modification time is unchanged.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::NotFound`] for an undeclared id
    /// - [`ResourceError::Access`] for sandbox violations and missing files
    /// - [`ResourceError::TooLarge`] if the file exceeds the size limit;
    ///   nothing is cached in that case
    /// - [`ResourceError::Io`] if the file cannot be read
    pub fn read(&self, id: &str) -> Result<ResourceContent, ResourceError> {
        let index = self.index.load();
        let entry = index
            .get(id)
            .ok_or_else(|| ResourceError::NotFound(id.to_string()))?;

        let path = self
            .sandbox
            .resolve(&entry.path)
            .map_err(|source| ResourceError::Access {
                id: id.to_string(),
                source,
            })?;
        let meta = self.source.metadata(&path).map_err(|source| ResourceError::Io {
            id: id.to_string(),
            source,
        })?;

        if let Some(bytes) = self.cache.get(id, meta.modified) {
            tracing::debug!(id, "Resource served from cache");
            return Ok(ResourceContent {
                entry: entry.clone(),
                bytes,
            });
        }

        let too_large = |size: u64| ResourceError::TooLarge {
            id: id.to_string(),
            size,
            limit: self.max_resource_size,
        };
        if meta.len > self.max_resource_size {
            return Err(too_large(meta.len));
        }
        let data = self.source.read(&path).map_err(|source| ResourceError::Io {
            id: id.to_string(),
            source,
        })?;
        let size = data.len() as u64;
        if size > self.max_resource_size {
            return Err(too_large(size));
        }

        let bytes: Arc<[u8]> = data.into();
        self.cache.insert(id, Arc::clone(&bytes), meta.modified);
        tracing::debug!(id, size, "Resource loaded");
        Ok(ResourceContent {
            entry: entry.clone(),
            bytes,
        })
    }

    /// Drops any cached content for `id`.
    pub fn invalidate(&self, id: &str) -> bool {
        self.cache.invalidate(id)
    }

    /// Publishes a new index and invalidates cache entries whose id was
    /// removed, whose declaration changed, or whose backing file is in
    /// `changed_paths`. Returns the number of invalidated entries.
    pub fn replace_index(&self, index: ResourceIndex, changed_paths: &[PathBuf]) -> usize {
        let changed: HashSet<PathBuf> = changed_paths
            .iter()
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
            .collect();
        let old = self.index.swap(index);
        let new = self.index.load();

        let mut invalidated = 0;
        for entry in old.iter() {
            let stale = new.get(&entry.id) != Some(entry)
                || changed.contains(&self.backing_path(&entry.path));
            if stale && self.cache.invalidate(&entry.id) {
                invalidated += 1;
            }
        }
        invalidated
    }

    fn backing_path(&self, relative: &str) -> PathBuf {
        self.sandbox
            .resolve(relative)
            .unwrap_or_else(|_| self.sandbox.root().join(relative))
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

//! Path containment for client-supplied relative paths.
//!
//! A [`Sandbox`] owns a canonical root directory. [`Sandbox::resolve`] only
//! returns paths whose fully resolved form (symlinks followed) lies under
//! that root. Anything else is denied.

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Reasons a path was refused or could not be resolved.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The sandbox root could not be resolved.
    #[error("sandbox root {path} is unavailable: {source}")]
    RootUnavailable {
        /// Configured root.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The sandbox root exists but is not a directory.
    #[error("sandbox root {0} is not a directory")]
    RootNotDirectory(PathBuf),

    /// The requested path is absolute.
    #[error("access denied: absolute paths are not allowed ({0})")]
    AbsolutePath(String),

    /// The requested path leaves the sandbox, textually or via symlinks.
    #[error("access denied: {0} resolves outside the resources directory")]
    Escape(String),

    /// The requested path does not exist.
    #[error("file not found: {path}")]
    Missing {
        /// Requested relative path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    /// Returns `true` for denials, as opposed to missing files.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        matches!(self, Self::AbsolutePath(_) | Self::Escape(_))
    }
}

/// A directory outside of which reads never resolve.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Creates a sandbox rooted at `root`, which must be an existing directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be canonicalised or is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|source| SandboxError::RootUnavailable {
                path: root.to_path_buf(),
                source,
            })?;
        if !canonical.is_dir() {
            return Err(SandboxError::RootNotDirectory(canonical));
        }
        Ok(Self { root: canonical })
    }

    /// The canonical root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `relative` to an absolute path inside the root.
    ///
    /// The textual path is checked first (no absolute paths, no `..` above
    /// the root) and the canonical path is checked again after symlinks are
    /// followed.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::AbsolutePath`] or [`SandboxError::Escape`] for
    /// denied paths and [`SandboxError::Missing`] if the target does not exist.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let requested = Path::new(relative);
        if requested.is_absolute() || requested.has_root() {
            tracing::warn!(path = relative, "Denied absolute resource path");
            return Err(SandboxError::AbsolutePath(relative.to_string()));
        }

        let mut depth: usize = 0;
        for component in requested.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir => {
                    depth = depth.checked_sub(1).ok_or_else(|| {
                        tracing::warn!(path = relative, "Denied path traversal");
                        SandboxError::Escape(relative.to_string())
                    })?;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::AbsolutePath(relative.to_string()));
                }
            }
        }

        let resolved = self
            .root
            .join(requested)
            .canonicalize()
            .map_err(|source| SandboxError::Missing {
                path: relative.to_string(),
                source,
            })?;

        if !resolved.starts_with(&self.root) {
            tracing::warn!(path = relative, "Denied symlink escape");
            return Err(SandboxError::Escape(relative.to_string()));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), "a").unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn resolves_nested_and_dotted_paths() {
        let (_dir, sandbox) = sandbox();
        let direct = sandbox.resolve("docs/a.txt").unwrap();
        let dotted = sandbox.resolve("./docs/../docs/a.txt").unwrap();
        assert_eq!(direct, dotted);
        assert!(direct.starts_with(sandbox.root()));
    }

    #[test]
    fn rejects_traversal() {
        let (_dir, sandbox) = sandbox();
        let err = sandbox.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, SandboxError::Escape(_)));
        assert!(err.is_violation());
        assert!(sandbox.resolve("docs/../../x").unwrap_err().is_violation());
    }

    #[test]
    fn rejects_absolute_paths() {
        let (_dir, sandbox) = sandbox();
        let absolute = sandbox.root().join("docs/a.txt");
        let err = sandbox.resolve(absolute.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, SandboxError::AbsolutePath(_)));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let (dir, sandbox) = sandbox();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();

        let err = sandbox.resolve("link.txt").unwrap_err();
        assert!(matches!(err, SandboxError::Escape(_)));
    }

    #[cfg(unix)]
    #[test]
    fn allows_symlink_within_root() {
        let (dir, sandbox) = sandbox();
        std::os::unix::fs::symlink(dir.path().join("docs/a.txt"), dir.path().join("alias.txt"))
            .unwrap();
        assert!(sandbox.resolve("alias.txt").is_ok());
    }

    #[test]
    fn missing_file_is_not_a_violation() {
        let (_dir, sandbox) = sandbox();
        let err = sandbox.resolve("docs/none.txt").unwrap_err();
        assert!(matches!(err, SandboxError::Missing { .. }));
        assert!(!err.is_violation());
    }

    #[test]
    fn missing_root_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Sandbox::new(dir.path().join("nope")),
            Err(SandboxError::RootUnavailable { .. })
        ));
    }
}

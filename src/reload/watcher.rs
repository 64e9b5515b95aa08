//! File-system watcher driving [`Reloader`].
//!
//! A `notify` watcher forwards raw change events to a dedicated thread. The
//! thread waits until no new event has arrived for the debounce window,
//! sorts the changed paths by the directory they live in, and rebuilds only
//! the affected registries.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::Reloader;

/// How often the processing thread checks the stop flag while idle.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Handle for a running watcher. Dropping it stops the watcher.
pub struct ReloadWatcher {
    running: Arc<AtomicBool>,
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ReloadWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadWatcher")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Which directory a changed path belongs to.
#[derive(Debug, Default, PartialEq, Eq)]
struct ChangeSet {
    tools: bool,
    prompts: bool,
    resources: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
struct WatchedDirs {
    tools: Option<PathBuf>,
    prompts: PathBuf,
    resources: PathBuf,
}

impl WatchedDirs {
    fn from_reloader(reloader: &Reloader) -> Self {
        let canonical = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        Self {
            tools: reloader.tools_dir().map(canonical),
            prompts: canonical(reloader.prompts_dir()),
            resources: canonical(reloader.resource_dir()),
        }
    }

    fn classify(&self, paths: impl IntoIterator<Item = PathBuf>) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for path in paths {
            if is_ignored(&path) {
                continue;
            }
            if self.tools.as_ref().is_some_and(|dir| path.starts_with(dir)) {
                changes.tools = true;
            } else if path.starts_with(&self.prompts) {
                changes.prompts = true;
            } else if path.starts_with(&self.resources) {
                changes.resources.push(path);
            }
        }
        changes
    }
}

/// Hidden files and editor or temp files.
fn is_ignored(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    name.starts_with('.')
        || name.ends_with('~')
        || name.ends_with(".tmp")
        || name.ends_with(".swp")
}

impl ReloadWatcher {
    /// Starts watching the reloader's directories.
    ///
    /// Directories that do not exist are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS watcher cannot be created or a directory
    /// cannot be watched.
    pub fn start(reloader: Reloader, debounce: Duration) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel::<Vec<PathBuf>>();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    );
                    if relevant && !event.paths.is_empty() {
                        let _ = tx.send(event.paths);
                    }
                }
                Err(e) => tracing::error!(error = %e, "File watcher error"),
            }
        })?;

        for dir in reloader.watched_dirs() {
            if dir.is_dir() {
                watcher.watch(&dir, RecursiveMode::Recursive)?;
                tracing::info!(path = %dir.display(), "Watching for changes");
            } else {
                tracing::warn!(path = %dir.display(), "Not watching missing directory");
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = Arc::clone(&running);
            let dirs = WatchedDirs::from_reloader(&reloader);
            std::thread::Builder::new()
                .name("reload-watcher".into())
                .spawn(move || process_events(&rx, &running, &dirs, &reloader, debounce))
                .map_err(notify::Error::io)?
        };

        Ok(Self {
            running,
            watcher: Some(watcher),
            thread: Some(thread),
        })
    }

    /// Returns `true` until [`stop`](Self::stop) is called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops watching and waits for the processing thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.watcher = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Reload watcher thread panicked");
            }
            tracing::info!("Reload watcher stopped");
        }
    }
}

impl Drop for ReloadWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn process_events(
    rx: &mpsc::Receiver<Vec<PathBuf>>,
    running: &AtomicBool,
    dirs: &WatchedDirs,
    reloader: &Reloader,
    debounce: Duration,
) {
    loop {
        let first = match rx.recv_timeout(IDLE_POLL) {
            Ok(paths) => paths,
            Err(RecvTimeoutError::Timeout) => {
                if running.load(Ordering::SeqCst) {
                    continue;
                }
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut paths: BTreeSet<PathBuf> = first.into_iter().collect();
        loop {
            match rx.recv_timeout(debounce) {
                Ok(more) => paths.extend(more),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let changes = dirs.classify(paths);
        tracing::debug!(?changes, "Applying file changes");
        apply(reloader, changes);
    }
}

fn apply(reloader: &Reloader, changes: ChangeSet) {
    // Failures are logged by the reloader and leave the old snapshot live.
    if changes.tools {
        let _ = reloader.reload_tools();
    }
    if !changes.resources.is_empty() {
        let _ = reloader.reload_resources(&changes.resources);
    }
    if changes.prompts {
        let _ = reloader.reload_prompts();
    }
}

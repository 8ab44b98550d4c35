//! Filesystem watcher capability, wired up from a server's
//! `client/registerCapability` request for `workspace/didChangeWatchedFiles`.
//!
//! The connection engine only depends on the `Watcher`/`ListenerFactory`
//! traits; a `notify`-backed default implementation is provided here so
//! callers get a working watcher without writing their own.

use notify::{Event, RecursiveMode, Watcher as _};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback invoked on a background thread for every filesystem event the
/// default watcher observes.
pub type FileEventHandler = dyn Fn(Event) + Send + Sync;

pub trait Watcher: Send {
    fn stop(&mut self);
}

pub trait ListenerFactory: Send + Sync {
    /// `glob_patterns` are absolute, already rooted at the project
    /// directory by the caller (the connection's `client/
    /// registerCapability` handler does the rooting).
    fn watch(&self, glob_patterns: &[String]) -> crate::error::Result<Box<dyn Watcher>>;
}

/// Resolves `relative_pattern` against `project_directory`, matching the
/// teacher's `file://`-prefix-stripping idiom in `utils::workspace`.
pub fn root_glob_pattern(project_directory: &Path, relative_pattern: &str) -> String {
    if relative_pattern.starts_with('/') {
        relative_pattern.to_string()
    } else {
        project_directory.join(relative_pattern).to_string_lossy().into_owned()
    }
}

struct NotifyWatcher {
    inner: Option<notify::RecommendedWatcher>,
    watched_root: PathBuf,
}

impl Watcher for NotifyWatcher {
    fn stop(&mut self) {
        if let Some(mut watcher) = self.inner.take() {
            if let Err(e) = watcher.unwatch(&self.watched_root) {
                warn!(error = %e, path = %self.watched_root.display(), "failed to unwatch path");
            }
        }
    }
}

impl Drop for NotifyWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Watches the deepest common ancestor directory of all glob patterns,
/// recursively. This is a coarse default suitable for local development
/// and tests; a production listener factory would filter per-pattern.
///
/// Events are handed to a `FileEventHandler` on a dedicated thread per
/// watch (the `notify` channel isn't `Send`-friendly to poll from async
/// code). The no-handler default just logs each event at debug level,
/// so a caller who doesn't care still sees that the watcher is alive
/// rather than having events vanish silently.
pub struct NotifyListenerFactory {
    handler: Arc<FileEventHandler>,
}

impl Default for NotifyListenerFactory {
    fn default() -> Self {
        Self::with_handler(Arc::new(|event: Event| {
            debug!(?event, "filesystem event (no handler registered)");
        }))
    }
}

impl NotifyListenerFactory {
    pub fn with_handler(handler: Arc<FileEventHandler>) -> Self {
        Self { handler }
    }
}

impl ListenerFactory for NotifyListenerFactory {
    fn watch(&self, glob_patterns: &[String]) -> crate::error::Result<Box<dyn Watcher>> {
        let root = common_ancestor(glob_patterns);
        debug!(root = %root.display(), patterns = ?glob_patterns, "starting filesystem watcher");

        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(tx)
            .map_err(|e| crate::error::ClientError::Io(std::io::Error::other(e)))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| crate::error::ClientError::Io(std::io::Error::other(e)))?;

        let handler = self.handler.clone();
        std::thread::spawn(move || {
            // `recv` returns `Err` once `tx` is dropped, which happens
            // when `NotifyWatcher::stop` drops the underlying watcher.
            while let Ok(result) = rx.recv() {
                match result {
                    Ok(event) => handler(event),
                    Err(e) => warn!(error = %e, "filesystem watch error"),
                }
            }
        });

        Ok(Box::new(NotifyWatcher {
            inner: Some(watcher),
            watched_root: root,
        }))
    }
}

fn common_ancestor(glob_patterns: &[String]) -> PathBuf {
    let mut ancestor: Option<PathBuf> = None;
    for pattern in glob_patterns {
        let stripped = pattern.split(['*', '?']).next().unwrap_or(pattern);
        let dir = Path::new(stripped)
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        ancestor = Some(match ancestor {
            None => dir,
            Some(existing) => longest_common_prefix(&existing, &dir),
        });
    }
    ancestor.unwrap_or_else(|| PathBuf::from("."))
}

fn longest_common_prefix(a: &Path, b: &Path) -> PathBuf {
    let a_components: Vec<_> = a.components().collect();
    let b_components: Vec<_> = b.components().collect();
    let mut out = PathBuf::new();
    for (ca, cb) in a_components.iter().zip(b_components.iter()) {
        if ca == cb {
            out.push(ca);
        } else {
            break;
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from("/")
    } else {
        out
    }
}

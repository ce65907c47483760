//! File system watcher for vault modifications
//!
//! Emits the path of each created or modified Markdown file on a channel.
//! Events carry the path only; content is re-read on demand by the engine.
//! Coalescing bursts is the engine's job, not the watcher's.

use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::error;

use crate::errors::{Result, VaultError};

/// Subscription handle for vault file events.
///
/// Dropping the handle releases the underlying watch; the owner keeps it
/// alive for as long as events should flow.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
}

impl VaultWatcher {
    /// Watch a vault root recursively. Returns the handle and the receiving
    /// end of the event channel.
    pub fn new(root: impl AsRef<Path>) -> Result<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        for path in event.paths {
                            if path.extension().map(|e| e == "md").unwrap_or(false) {
                                let _ = tx.send(path);
                            }
                        }
                    }
                }
                Err(e) => error!("vault watcher error: {}", e),
            },
            Config::default(),
        )
        .map_err(|e| VaultError::Watcher(e.to_string()))?;

        watcher
            .watch(root.as_ref(), RecursiveMode::Recursive)
            .map_err(|e| VaultError::Watcher(e.to_string()))?;

        Ok((Self { _watcher: watcher }, rx))
    }
}

use std::path::{Path, PathBuf};

use medsync_core::{RemoteChange, RemoteChanges, StorageError};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::sync::is_conflict_copy;

/// Queue depth between the watcher thread and the consumer.
const CHANNEL_CAPACITY: usize = 64;

/// Watch one file for changes using the `notify` crate.
///
/// Uses filesystem events (inotify on Linux, FSEvents on macOS, etc.) on the
/// file's parent directory and forwards events that touch the file itself or
/// one of its conflicted copies. The watcher lives inside the returned
/// [`RemoteChanges`] and stops when it is dropped.
pub fn watch_file(path: &Path) -> Result<RemoteChanges, StorageError> {
    let (tx, rx) = mpsc::channel::<RemoteChange>(CHANNEL_CAPACITY);
    let tracked = path.to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if let Some(changed) = relevant_path(&tracked, &event) {
                    let change = RemoteChange {
                        path: changed,
                        detected_at: chrono::Utc::now(),
                    };
                    // A full queue already guarantees a pending reload.
                    if tx.try_send(change).is_err() {
                        debug!("Change queue full or closed; dropping duplicate notification");
                    }
                }
            }
            Err(e) => {
                warn!("Watch error: {}", e);
            }
        },
        Config::default(),
    )
    .map_err(|e| StorageError::Watch(format!("Failed to create watcher: {}", e)))?;

    // Watch the parent directory: atomic replaces swap the file's inode.
    let watch_path = path.parent().unwrap_or(path);
    watcher
        .watch(watch_path, RecursiveMode::NonRecursive)
        .map_err(|e| {
            StorageError::Watch(format!(
                "Failed to watch {}: {}",
                watch_path.display(),
                e
            ))
        })?;

    info!("Started watching {}", path.display());
    Ok(RemoteChanges::new(rx, watcher))
}

/// The event's path that concerns `tracked`, if any.
///
/// Paths are compared by file name because some backends report
/// canonicalized directories.
fn relevant_path(tracked: &Path, event: &Event) -> Option<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
        _ => return None,
    }

    let tracked_name = tracked.file_name()?;
    event
        .paths
        .iter()
        .find(|p| p.file_name() == Some(tracked_name) || is_conflict_copy(tracked, p))
        .cloned()
}

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medsync_core::{
    ConflictRevision, CoordinationGuard, CoordinationIntent, RemoteChanges, StorageError,
    SyncSubstrate,
};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::lock::FileCoordinator;
use crate::watch;

/// Substrate for a folder kept in sync by an external daemon.
///
/// Works with Syncthing, Dropbox, Nextcloud and similar clients:
/// - Coordination: advisory locks via [`FileCoordinator`]
/// - Conflicts: the daemon's "conflicted copy" siblings of the tracked file
/// - Moves: `rename` into the synced folder
/// - Changes: filesystem events via `notify`
#[derive(Debug, Default, Clone)]
pub struct SyncFolderSubstrate {
    coordinator: FileCoordinator,
}

impl SyncFolderSubstrate {
    pub fn new() -> Self {
        Self {
            coordinator: FileCoordinator::new(),
        }
    }
}

/// Whether `candidate` is a conflicted copy of `tracked`.
///
/// Matches names that keep the tracked file's stem and extension and mention
/// a conflict in between, e.g. for `medications.json`:
/// - `medications.sync-conflict-20240101-101010-ABCDEF7.json` (Syncthing)
/// - `medications (conflicted copy 2024-01-01).json` (Dropbox, Nextcloud)
pub fn is_conflict_copy(tracked: &Path, candidate: &Path) -> bool {
    let (Some(tracked_name), Some(candidate_name)) = (tracked.file_name(), candidate.file_name())
    else {
        return false;
    };
    if tracked_name == candidate_name {
        return false;
    }

    let stem = tracked.file_stem().map(|s| s.to_string_lossy().to_string());
    let extension = tracked.extension().map(|e| format!(".{}", e.to_string_lossy()));
    let (Some(stem), Some(extension)) = (stem, extension) else {
        return false;
    };

    let name = candidate_name.to_string_lossy();
    name.strip_prefix(stem.as_str())
        .and_then(|rest| rest.strip_suffix(extension.as_str()))
        .is_some_and(|middle| middle.to_lowercase().contains("conflict"))
}

fn modified_at(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl SyncSubstrate for SyncFolderSubstrate {
    fn backend_name(&self) -> &'static str {
        "sync-folder"
    }

    async fn coordinate(
        &self,
        path: &Path,
        intent: CoordinationIntent,
    ) -> Result<CoordinationGuard, StorageError> {
        self.coordinator.acquire(path, intent).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn conflicting_revisions(
        &self,
        path: &Path,
    ) -> Result<Vec<ConflictRevision>, StorageError> {
        let Some(dir) = path.parent() else {
            return Ok(vec![]);
        };

        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to read dir {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut revisions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(format!("Failed to read dir entry: {}", e)))?
        {
            let candidate = entry.path();
            if !is_conflict_copy(path, &candidate) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping conflict candidate {}: {}", candidate.display(), e);
                    continue;
                }
            };
            revisions.push(ConflictRevision {
                path: candidate,
                modified_at: modified_at(&metadata),
            });
        }

        revisions.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            "Found {} conflicting revision(s) of {}",
            revisions.len(),
            path.display()
        );
        Ok(revisions)
    }

    #[instrument(skip(self, resolved), level = "debug", fields(count = resolved.len()))]
    async fn discard_resolved_revisions(
        &self,
        path: &Path,
        resolved: &[ConflictRevision],
    ) -> Result<(), StorageError> {
        let mut failed: Vec<PathBuf> = Vec::new();
        for revision in resolved {
            match fs::remove_file(&revision.path).await {
                Ok(()) => debug!("Discarded revision {}", revision.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to discard {}: {}", revision.path.display(), e);
                    failed.push(revision.path.clone());
                }
            }
            // Sidecars from earlier lock scopes on the revision itself.
            let _ = fs::remove_file(FileCoordinator::lock_path(&revision.path)).await;
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Io(format!(
                "Failed to discard {} revision(s) of {}",
                failed.len(),
                path.display()
            )))
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn move_into_synced_storage(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<(), StorageError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Io(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        fs::rename(source, destination).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to move {} to {}: {}",
                source.display(),
                destination.display(),
                e
            ))
        })?;

        info!(
            "Moved {} into synced storage at {}",
            source.display(),
            destination.display()
        );
        Ok(())
    }

    async fn subscribe(&self, path: &Path) -> Result<RemoteChanges, StorageError> {
        watch::watch_file(path)
    }
}

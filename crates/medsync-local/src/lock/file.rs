use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use medsync_core::{CoordinationGuard, CoordinationIntent, StorageError};
use tracing::{debug, instrument};

/// Coordination scopes built on OS-level advisory file locks.
///
/// Every coordinated file gets a sidecar lock file in the same directory:
/// `{dir}/.{file_name}.lock`
///
/// - Read intent takes a shared lock (flock `LOCK_SH` on Unix, `LockFileEx` on Windows)
/// - Write-for-replacing intent takes an exclusive lock
/// - The handle lives inside the returned guard; dropping the guard unlocks
/// - Process crash releases the lock (the OS closes file descriptors)
///
/// Acquisition blocks without a timeout, on a blocking worker thread.
#[derive(Debug, Default, Clone)]
pub struct FileCoordinator;

impl FileCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Path of the sidecar lock file for `path`.
    pub fn lock_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.lock", name))
    }

    /// Open a coordination scope on `path`.
    #[instrument(skip(self), level = "debug")]
    pub async fn acquire(
        &self,
        path: &Path,
        intent: CoordinationIntent,
    ) -> Result<CoordinationGuard, StorageError> {
        let lock_path = Self::lock_path(path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Coordination(format!(
                    "Failed to create lock dir {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let blocking_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || lock_file(&blocking_path, intent))
            .await
            .map_err(|e| StorageError::Coordination(format!("Lock task failed: {}", e)))??;

        debug!("Acquired {} scope on {}", intent, path.display());
        Ok(CoordinationGuard::new(
            path.to_path_buf(),
            intent,
            LockToken { file, lock_path },
        ))
    }
}

fn lock_file(lock_path: &Path, intent: CoordinationIntent) -> Result<File, StorageError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| {
            StorageError::Coordination(format!(
                "Failed to open lock file {}: {}",
                lock_path.display(),
                e
            ))
        })?;

    let locked = match intent {
        CoordinationIntent::Reading => FileExt::lock_shared(&file),
        CoordinationIntent::WritingForReplacing => FileExt::lock_exclusive(&file),
    };
    locked.map_err(|e| {
        StorageError::Coordination(format!(
            "Failed to lock {}: {}",
            lock_path.display(),
            e
        ))
    })?;

    Ok(file)
}

/// Held lock; unlocking happens on drop.
struct LockToken {
    file: File,
    lock_path: PathBuf,
}

impl Drop for LockToken {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released lock {}", self.lock_path.display());
    }
}

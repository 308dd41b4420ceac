use std::path::{Path, PathBuf};
use std::sync::Arc;

use medsync_core::{CoordinationIntent, StorageError, SyncSubstrate};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::locator::Location;

/// Reads and writes the collection file.
///
/// Cloud locations are accessed inside a coordination scope so this process
/// never interleaves with the sync daemon; the operation targets the path the
/// scope hands out. Local locations skip coordination. Writes are atomic in
/// both cases.
#[derive(Clone)]
pub struct CoordinatedIo {
    substrate: Arc<dyn SyncSubstrate>,
}

impl std::fmt::Debug for CoordinatedIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatedIo")
            .field("substrate", &self.substrate.backend_name())
            .finish()
    }
}

impl CoordinatedIo {
    pub fn new(substrate: Arc<dyn SyncSubstrate>) -> Self {
        Self { substrate }
    }

    /// Read the whole file. A missing file is `StorageError::NotFound`.
    #[instrument(skip(self, location), level = "debug", fields(path = %location.path.display(), kind = %location.kind))]
    pub async fn read(&self, location: &Location) -> Result<Vec<u8>, StorageError> {
        if location.is_cloud() {
            let guard = self
                .substrate
                .coordinate(&location.path, CoordinationIntent::Reading)
                .await?;
            read_file(guard.path()).await
        } else {
            read_file(&location.path).await
        }
    }

    /// Replace the file's contents atomically.
    #[instrument(skip(self, location, data), level = "debug", fields(path = %location.path.display(), kind = %location.kind, data_len = data.len()))]
    pub async fn write(&self, location: &Location, data: &[u8]) -> Result<(), StorageError> {
        if location.is_cloud() {
            let guard = self
                .substrate
                .coordinate(&location.path, CoordinationIntent::WritingForReplacing)
                .await?;
            atomic_write(guard.path(), data).await
        } else {
            atomic_write(&location.path, data).await
        }
    }
}

/// Read a file, mapping a missing file to `NotFound`.
pub async fn read_file(path: &Path) -> Result<Vec<u8>, StorageError> {
    match fs::read(path).await {
        Ok(data) => {
            debug!("Read {} ({} bytes)", path.display(), data.len());
            Ok(data)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StorageError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(StorageError::Io(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Write via a temp file in the same directory, then rename over the target.
///
/// Readers see either the old or the new contents, never a partial file.
pub async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::Io(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = temp_path_for(path);
    if let Err(e) = write_synced(&temp_path, data).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        if let Err(cleanup) = fs::remove_file(&temp_path).await {
            warn!("Failed to remove {}: {}", temp_path.display(), cleanup);
        }
        return Err(StorageError::Io(format!(
            "Failed to rename to {}: {}",
            path.display(),
            e
        )));
    }

    debug!("Wrote {} ({} bytes)", path.display(), data.len());
    Ok(())
}

/// Hidden, unique sibling of `path` used as the write staging file.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

async fn write_synced(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let io_err =
        |e: std::io::Error| StorageError::Io(format!("Failed to write {}: {}", path.display(), e));

    let mut file = fs::File::create(path).await.map_err(io_err)?;
    file.write_all(data).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncFolderSubstrate;
    use tempfile::TempDir;

    fn setup() -> (CoordinatedIo, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let io = CoordinatedIo::new(Arc::new(SyncFolderSubstrate::new()));
        (io, temp_dir)
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[tokio::test]
    async fn test_local_read_write() {
        let (io, temp) = setup();
        let location = Location::local(temp.path().join("medications.json"));

        assert!(matches!(
            io.read(&location).await,
            Err(StorageError::NotFound(_))
        ));

        io.write(&location, b"[1]").await.unwrap();
        assert_eq!(io.read(&location).await.unwrap(), b"[1]");

        io.write(&location, b"[1, 2]").await.unwrap();
        assert_eq!(io.read(&location).await.unwrap(), b"[1, 2]");
        assert!(leftovers(temp.path()).is_empty());
        // No coordination scope for local files.
        assert!(!temp.path().join(".medications.json.lock").exists());
    }

    #[tokio::test]
    async fn test_cloud_read_write_is_coordinated() {
        let (io, temp) = setup();
        let location = Location::cloud(temp.path().join("Documents").join("medications.json"));

        io.write(&location, b"[]").await.unwrap();
        assert_eq!(io.read(&location).await.unwrap(), b"[]");
        assert!(temp
            .path()
            .join("Documents")
            .join(".medications.json.lock")
            .exists());
        assert!(leftovers(&temp.path().join("Documents")).is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_target_untouched() {
        let (io, temp) = setup();
        let target = temp.path().join("medications.json");
        std::fs::write(&target, b"original").unwrap();

        // A directory where the file should be makes the rename fail.
        let blocked = Location::local(temp.path().join("blocked"));
        std::fs::create_dir_all(blocked.path.join("child")).unwrap();
        assert!(io.write(&blocked, b"new").await.is_err());

        assert_eq!(std::fs::read(&target).unwrap(), b"original");
        assert!(leftovers(temp.path()).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_never_tear() {
        let (io, temp) = setup();
        let location = Location::cloud(temp.path().join("medications.json"));
        let payloads: Vec<Vec<u8>> = (0..8).map(|i| vec![b'a' + i as u8; 4096]).collect();

        let mut handles = vec![];
        for payload in payloads.clone() {
            let io = io.clone();
            let location = location.clone();
            handles.push(tokio::spawn(async move {
                io.write(&location, &payload).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let contents = io.read(&location).await.unwrap();
        assert!(payloads.contains(&contents));
    }
}

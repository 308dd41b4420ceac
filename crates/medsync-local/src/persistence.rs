use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use medsync_core::{codec, Medication, StorageError, SyncSubstrate};
use tracing::{debug, error, info, instrument, warn};

use crate::io::{atomic_write, CoordinatedIo};
use crate::locator::{Location, StorageLocator};
use crate::migration::{MigrationManager, MigrationOutcome};
use crate::monitor::ChangeMonitor;
use crate::resolver::{ConflictResolver, ReconcileOutcome};

/// Entry point for loading and saving the medication collection.
///
/// Picks the location on every call, reconciles conflicting revisions before
/// each load, and absorbs failures: `load` always returns a collection and
/// `save` never fails from the caller's point of view.
pub struct Persistence {
    locator: StorageLocator,
    substrate: Arc<dyn SyncSubstrate>,
    io: CoordinatedIo,
    resolver: ConflictResolver,
    migration: MigrationManager,
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("locator", &self.locator)
            .field("substrate", &self.substrate.backend_name())
            .finish_non_exhaustive()
    }
}

impl Persistence {
    pub fn new(locator: StorageLocator, substrate: Arc<dyn SyncSubstrate>) -> Self {
        let io = CoordinatedIo::new(substrate.clone());
        Self {
            resolver: ConflictResolver::new(substrate.clone(), io.clone()),
            migration: MigrationManager::new(locator.clone(), substrate.clone(), io.clone()),
            locator,
            substrate,
            io,
        }
    }

    pub fn locator(&self) -> &StorageLocator {
        &self.locator
    }

    pub fn cloud_available(&self) -> bool {
        self.locator.cloud_available()
    }

    pub fn effective_location(&self) -> Location {
        self.locator.effective_location()
    }

    /// Move local data into the cloud folder. Only the first call does work.
    pub async fn migrate(&self) -> MigrationOutcome {
        self.migration.migrate().await
    }

    /// Load the collection, reconciling conflicts first.
    ///
    /// A missing file is an empty collection. An unreadable one is logged,
    /// copied aside for manual recovery, and also loads as empty.
    pub async fn load(&self) -> Vec<Medication> {
        match self.try_load().await {
            Ok(medications) => medications,
            Err(e) => {
                error!("Failed to load medications: {}", e);
                Vec::new()
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn try_load(&self) -> Result<Vec<Medication>, StorageError> {
        let location = self.effective_location();

        if let ReconcileOutcome::Resolved { revisions, .. } =
            self.resolver.reconcile(&location).await
        {
            debug!("Reconciled {} revision(s) before load", revisions);
        }

        let bytes = match self.io.read(&location).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                debug!("No data at {} yet", location.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        match codec::decode(&bytes) {
            Ok(medications) => {
                debug!(
                    "Loaded {} medication(s) from {} storage",
                    medications.len(),
                    location.kind
                );
                Ok(medications)
            }
            Err(e) => {
                error!(
                    "Data at {} is undecodable, loading empty collection: {}",
                    location.path.display(),
                    e
                );
                preserve_unreadable(&location.path, &bytes).await;
                Ok(Vec::new())
            }
        }
    }

    /// Persist the collection. Failures are logged, not returned.
    pub async fn save(&self, medications: &[Medication]) {
        if let Err(e) = self.try_save(medications).await {
            error!("Failed to save medications: {}", e);
        }
    }

    /// Persist the collection through the coordinated writer.
    ///
    /// Never reconciles, so saving from inside a reconciliation cannot recurse.
    #[instrument(skip(self, medications), level = "debug", fields(count = medications.len()))]
    pub async fn try_save(&self, medications: &[Medication]) -> Result<(), StorageError> {
        let location = self.effective_location();
        let bytes = codec::encode(medications)?;
        self.io.write(&location, &bytes).await?;
        debug!(
            "Saved {} medication(s) to {} storage",
            medications.len(),
            location.kind
        );
        Ok(())
    }

    /// Number of unresolved conflicting revisions at the cloud location.
    pub async fn pending_conflicts(&self) -> Result<usize, StorageError> {
        match self.locator.cloud_location() {
            Some(location) => Ok(self
                .substrate
                .conflicting_revisions(&location.path)
                .await?
                .len()),
            None => Ok(0),
        }
    }

    /// Start monitoring the cloud location for remote changes.
    pub async fn watch(&self) -> Result<Option<ChangeMonitor>, StorageError> {
        ChangeMonitor::start(self.substrate.clone(), &self.locator).await
    }
}

fn unreadable_prefix(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}.unreadable-", name)
}

/// Sibling path holding a copy of an unreadable file.
fn unreadable_path(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        "{}{}",
        unreadable_prefix(path),
        Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
    ))
}

/// An existing copy of `bytes` next to `path`, if any.
async fn existing_copy(path: &Path, bytes: &[u8]) -> Option<PathBuf> {
    let prefix = unreadable_prefix(path);
    let mut entries = tokio::fs::read_dir(path.parent()?).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let candidate = entry.path();
        if tokio::fs::read(&candidate).await.is_ok_and(|kept| kept == bytes) {
            return Some(candidate);
        }
    }
    None
}

/// Keep the raw bytes so the next save does not destroy them.
///
/// Content already kept from an earlier load is not copied again.
async fn preserve_unreadable(path: &Path, bytes: &[u8]) {
    if let Some(kept) = existing_copy(path, bytes).await {
        debug!("Unreadable data already kept at {}", kept.display());
        return;
    }
    let backup = unreadable_path(path);
    match atomic_write(&backup, bytes).await {
        Ok(()) => info!("Kept unreadable data at {}", backup.display()),
        Err(e) => warn!("Failed to keep unreadable data at {}: {}", backup.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncFolderSubstrate;
    use chrono::TimeZone;
    use medsync_core::DoseRecord;
    use tempfile::TempDir;

    fn setup(with_cloud: bool) -> (Persistence, TempDir) {
        let temp = TempDir::new().unwrap();
        let cloud_root = temp.path().join("Sync");
        if with_cloud {
            std::fs::create_dir_all(&cloud_root).unwrap();
        }
        let locator = StorageLocator::new(temp.path().join("local"), Some(cloud_root));
        let persistence = Persistence::new(locator, Arc::new(SyncFolderSubstrate::new()));
        (persistence, temp)
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let (persistence, _temp) = setup(false);
        assert!(persistence.try_load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_local() {
        let (persistence, _temp) = setup(false);
        assert!(!persistence.cloud_available());

        let mut med = Medication::new("Aspirin", 8.0, "with food").unwrap();
        med.dose_history
            .push(DoseRecord::new(Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(), ""));

        persistence.save(std::slice::from_ref(&med)).await;
        assert_eq!(persistence.load().await, vec![med]);
        assert!(!persistence.effective_location().is_cloud());
    }

    #[tokio::test]
    async fn test_save_goes_to_cloud_when_available() {
        let (persistence, _temp) = setup(true);
        let med = Medication::new("Aspirin", 8.0, "").unwrap();

        persistence.try_save(std::slice::from_ref(&med)).await.unwrap();

        let location = persistence.effective_location();
        assert!(location.is_cloud());
        assert!(location.path.exists());
        assert!(!persistence.locator().local_location().path.exists());
        assert_eq!(persistence.load().await, vec![med]);
    }

    #[tokio::test]
    async fn test_undecodable_file_is_kept_aside() {
        let (persistence, temp) = setup(false);
        let location = persistence.effective_location();
        std::fs::write(&location.path, b"{ broken").unwrap();

        assert!(persistence.load().await.is_empty());

        let names = files_in(&temp.path().join("local"));
        let backup = names
            .iter()
            .find(|n| n.starts_with("medications.json.unreadable-"))
            .expect("backup written");
        assert_eq!(
            std::fs::read(temp.path().join("local").join(backup)).unwrap(),
            b"{ broken"
        );
    }

    #[tokio::test]
    async fn test_repeated_loads_keep_one_backup() {
        let (persistence, temp) = setup(false);
        let location = persistence.effective_location();
        std::fs::write(&location.path, b"{ broken").unwrap();

        for _ in 0..5 {
            assert!(persistence.load().await.is_empty());
        }
        let backups = |names: Vec<String>| {
            names
                .into_iter()
                .filter(|n| n.starts_with("medications.json.unreadable-"))
                .count()
        };
        assert_eq!(backups(files_in(&temp.path().join("local"))), 1);

        // Different unreadable content gets its own copy.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        std::fs::write(&location.path, b"[{ also broken").unwrap();
        assert!(persistence.load().await.is_empty());
        assert_eq!(backups(files_in(&temp.path().join("local"))), 2);
    }

    #[tokio::test]
    async fn test_load_reconciles_conflicts() {
        let (persistence, _temp) = setup(true);
        let mut med = Medication::new("Aspirin", 8.0, "").unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 16, 0, 0).unwrap();
        med.dose_history.push(DoseRecord::new(t1, ""));
        persistence.try_save(std::slice::from_ref(&med)).await.unwrap();

        let mut other = med.clone();
        other.dose_history.push(DoseRecord::new(t2, ""));
        let location = persistence.effective_location();
        std::fs::write(
            location
                .path
                .with_file_name("medications.sync-conflict-20240101-160000-ABCDEF7.json"),
            codec::encode(&[other]).unwrap(),
        )
        .unwrap();
        assert_eq!(persistence.pending_conflicts().await.unwrap(), 1);

        let loaded = persistence.load().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].dose_history.len(), 2);
        assert_eq!(loaded[0].last_given_date(), Some(t2));
        assert_eq!(persistence.pending_conflicts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_pending_conflicts_without_cloud() {
        let (persistence, _temp) = setup(false);
        assert_eq!(persistence.pending_conflicts().await.unwrap(), 0);
        assert!(persistence.watch().await.unwrap().is_none());
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use medsync_core::{codec, merge_collections, CoordinationIntent, Medication, StorageError, SyncSubstrate};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::io::{atomic_write, read_file, CoordinatedIo};
use crate::locator::{Location, StorageLocator};

/// What the one-time local-to-cloud migration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The cloud folder is not available.
    CloudUnavailable,
    /// No local data to migrate.
    NothingToMigrate,
    /// The local file was moved into the cloud folder.
    Moved,
    /// Moving failed, the local file was copied instead.
    Copied,
    /// Both sides had data; the merged result now lives in the cloud folder.
    Merged {
        medications: usize,
        /// Whether the local file was removed afterwards
        local_removed: bool,
    },
    /// Migration already ran in this process.
    AlreadyRan,
    /// Migration failed; the local file was left in place.
    Failed,
}

/// Consolidates a local-only collection into the cloud folder.
pub struct MigrationManager {
    locator: StorageLocator,
    substrate: Arc<dyn SyncSubstrate>,
    io: CoordinatedIo,
    ran: AtomicBool,
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("locator", &self.locator)
            .field("ran", &self.ran)
            .finish_non_exhaustive()
    }
}

impl MigrationManager {
    pub fn new(locator: StorageLocator, substrate: Arc<dyn SyncSubstrate>, io: CoordinatedIo) -> Self {
        Self {
            locator,
            substrate,
            io,
            ran: AtomicBool::new(false),
        }
    }

    /// Run the migration once per process. Later calls are no-ops.
    ///
    /// Failures are logged, never returned.
    pub async fn migrate(&self) -> MigrationOutcome {
        if self.ran.swap(true, Ordering::AcqRel) {
            debug!("Migration already ran in this process");
            return MigrationOutcome::AlreadyRan;
        }

        match self.try_migrate().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Migration to cloud storage failed: {}", e);
                MigrationOutcome::Failed
            }
        }
    }

    /// Run the migration, reporting failures to the caller.
    pub async fn try_migrate(&self) -> Result<MigrationOutcome, StorageError> {
        let Some(cloud) = self.locator.cloud_location() else {
            return Ok(MigrationOutcome::CloudUnavailable);
        };
        let local = self.locator.local_location();

        let local_exists = fs::try_exists(&local.path).await.unwrap_or(false);
        let cloud_exists = fs::try_exists(&cloud.path).await.unwrap_or(false);

        match (local_exists, cloud_exists) {
            (false, _) => Ok(MigrationOutcome::NothingToMigrate),
            (true, false) => self.move_local(&local, &cloud).await,
            (true, true) => self.merge_local(&local, &cloud).await,
        }
    }

    /// First launch with a cloud folder: hand the local file over.
    async fn move_local(&self, local: &Location, cloud: &Location) -> Result<MigrationOutcome, StorageError> {
        let guard = self
            .substrate
            .coordinate(&cloud.path, CoordinationIntent::WritingForReplacing)
            .await?;

        match self
            .substrate
            .move_into_synced_storage(&local.path, guard.path())
            .await
        {
            Ok(()) => {
                info!("Migrated local data to {}", cloud.path.display());
                Ok(MigrationOutcome::Moved)
            }
            Err(e) => {
                warn!("Moving local data failed ({}), copying instead", e);
                let bytes = read_file(&local.path).await?;
                atomic_write(guard.path(), &bytes).await?;
                info!("Copied local data to {}", cloud.path.display());
                Ok(MigrationOutcome::Copied)
            }
        }
    }

    /// Both sides have data: merge per id, write to the cloud, then drop local.
    async fn merge_local(&self, local: &Location, cloud: &Location) -> Result<MigrationOutcome, StorageError> {
        let (local_meds, local_readable) = match self.io.read(local).await {
            Ok(bytes) => decode_or_empty(&bytes, local),
            Err(StorageError::NotFound(_)) => (Vec::new(), true),
            Err(e) => return Err(e),
        };
        let cloud_meds = match self.io.read(cloud).await {
            Ok(bytes) => decode_or_empty(&bytes, cloud).0,
            Err(StorageError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let merged = merge_collections(cloud_meds, local_meds);
        let bytes = codec::encode(&merged)?;
        self.io.write(cloud, &bytes).await?;

        // The merged copy is durable now; an unreadable local file is kept
        // so it can still be recovered by hand.
        let local_removed = if local_readable {
            match fs::remove_file(&local.path).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to remove {}: {}", local.path.display(), e);
                    false
                }
            }
        } else {
            warn!(
                "Keeping unreadable local file {} after migration",
                local.path.display()
            );
            false
        };

        info!(
            "Merged local and cloud data ({} medication(s))",
            merged.len()
        );
        Ok(MigrationOutcome::Merged {
            medications: merged.len(),
            local_removed,
        })
    }
}

fn decode_or_empty(bytes: &[u8], location: &Location) -> (Vec<Medication>, bool) {
    match codec::decode(bytes) {
        Ok(medications) => (medications, true),
        Err(e) => {
            warn!(
                "{} data at {} is undecodable, treating as empty: {}",
                location.kind,
                location.path.display(),
                e
            );
            (Vec::new(), false)
        }
    }
}

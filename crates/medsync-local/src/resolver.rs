use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use std::path::Path;

use medsync_core::{
    codec, ConflictRevision, CoordinationIntent, Medication, MergeAccumulator, StorageError,
    SyncSubstrate,
};
use tracing::{debug, info, instrument, warn};

use crate::io::{read_file, CoordinatedIo};
use crate::locator::Location;

/// What a reconciliation pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to do (no conflicts, or not a synced location).
    NoConflicts,
    /// Another pass is already running on this resolver.
    AlreadyRunning,
    /// Revisions were merged and written back.
    Resolved {
        /// Conflicting revisions discarded
        revisions: usize,
        /// Medications in the merged result
        medications: usize,
    },
    /// The pass failed; conflicts stay for the next one.
    Failed,
}

/// Merges conflicting revisions left by the sync daemon back into one file.
///
/// The merged result is written with [`CoordinatedIo::write`] directly and
/// never through the load path, so a reconciliation cannot trigger another
/// one. The `running` flag additionally rejects overlapping passes.
pub struct ConflictResolver {
    substrate: Arc<dyn SyncSubstrate>,
    io: CoordinatedIo,
    running: AtomicBool,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("substrate", &self.substrate.backend_name())
            .field("running", &self.running)
            .finish()
    }
}

impl ConflictResolver {
    pub fn new(substrate: Arc<dyn SyncSubstrate>, io: CoordinatedIo) -> Self {
        Self {
            substrate,
            io,
            running: AtomicBool::new(false),
        }
    }

    /// Best-effort reconciliation; failures are logged and absorbed.
    pub async fn reconcile(&self, location: &Location) -> ReconcileOutcome {
        match self.try_reconcile(location).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Conflict resolution for {} failed: {}",
                    location.path.display(),
                    e
                );
                ReconcileOutcome::Failed
            }
        }
    }

    /// Reconcile, reporting failures to the caller.
    ///
    /// If the merged write fails, no revision is discarded and the next pass
    /// sees the same conflicts again.
    #[instrument(skip(self, location), level = "debug", fields(path = %location.path.display()))]
    pub async fn try_reconcile(&self, location: &Location) -> Result<ReconcileOutcome, StorageError> {
        if !location.is_cloud() {
            return Ok(ReconcileOutcome::NoConflicts);
        }
        let Some(_running) = RunningGuard::acquire(&self.running) else {
            debug!("Reconciliation already in progress");
            return Ok(ReconcileOutcome::AlreadyRunning);
        };
        self.run(location).await
    }

    async fn run(&self, location: &Location) -> Result<ReconcileOutcome, StorageError> {
        let revisions = self.substrate.conflicting_revisions(&location.path).await?;
        if revisions.is_empty() {
            return Ok(ReconcileOutcome::NoConflicts);
        }
        info!(
            "Resolving {} conflicting revision(s) of {}",
            revisions.len(),
            location.path.display()
        );

        // One read scope on the tracked file covers its revisions too, so
        // no lock sidecars are created next to them.
        let scope = self
            .substrate
            .coordinate(&location.path, CoordinationIntent::Reading)
            .await?;

        let mut merged = MergeAccumulator::new();
        merged.absorb_all(read_current(scope.path()).await?);

        let mut resolved: Vec<ConflictRevision> = Vec::with_capacity(revisions.len());
        for revision in revisions {
            match read_file(&revision.path).await {
                Ok(bytes) => match codec::decode(&bytes) {
                    Ok(medications) => {
                        let count = merged.absorb_all(medications);
                        debug!(
                            "Merged revision {} ({} shared medication(s))",
                            revision.path.display(),
                            count
                        );
                    }
                    Err(e) => warn!(
                        "Skipping undecodable revision {}: {}",
                        revision.path.display(),
                        e
                    ),
                },
                // Vanished between listing and reading: nothing left to merge.
                Err(StorageError::NotFound(_)) => {}
                Err(e) => {
                    warn!(
                        "Leaving unreadable revision {} for a later pass: {}",
                        revision.path.display(),
                        e
                    );
                    continue;
                }
            }
            resolved.push(revision);
        }

        drop(scope);

        let medications = merged.into_medications();
        let bytes = codec::encode(&medications)?;
        self.io
            .write(location, &bytes)
            .await
            .map_err(|e| StorageError::MergePersist(e.to_string()))?;

        self.substrate
            .discard_resolved_revisions(&location.path, &resolved)
            .await?;

        info!(
            "Resolved {} revision(s) into {} medication(s)",
            resolved.len(),
            medications.len()
        );
        Ok(ReconcileOutcome::Resolved {
            revisions: resolved.len(),
            medications: medications.len(),
        })
    }
}

/// Clears the `running` flag when dropped, including on cancellation.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The current revision; missing or undecodable counts as empty.
async fn read_current(path: &Path) -> Result<Vec<Medication>, StorageError> {
    match read_file(path).await {
        Ok(bytes) => Ok(codec::decode(&bytes).unwrap_or_else(|e| {
            warn!(
                "Current revision {} is undecodable, merging as empty: {}",
                path.display(),
                e
            );
            Vec::new()
        })),
        Err(StorageError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use medsync_core::{RemoteChanges, StorageError, SyncSubstrate};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::locator::{Location, StorageLocator};

/// Application-level signal that the synced file changed elsewhere.
///
/// Carries no data: the receiver must reload rather than trust the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDataChanged {
    pub location: Location,
    pub detected_at: DateTime<Utc>,
}

/// Watches the cloud location and turns substrate notifications into
/// [`RemoteDataChanged`] events.
///
/// Notifications that pile up while the consumer is busy collapse into one
/// event, since a single reload covers all of them.
pub struct ChangeMonitor {
    location: Location,
    changes: RemoteChanges,
}

impl std::fmt::Debug for ChangeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeMonitor")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl ChangeMonitor {
    /// Subscribe to the cloud location. `None` while no cloud folder exists.
    pub async fn start(
        substrate: Arc<dyn SyncSubstrate>,
        locator: &StorageLocator,
    ) -> Result<Option<Self>, StorageError> {
        let Some(location) = locator.cloud_location() else {
            debug!("Cloud storage unavailable; not monitoring remote changes");
            return Ok(None);
        };

        let changes = substrate.subscribe(&location.path).await?;
        info!("Monitoring {} for remote changes", location.path.display());
        Ok(Some(Self { location, changes }))
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Wait for the next change. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<RemoteDataChanged> {
        let change = self.changes.recv().await?;
        let coalesced = self.changes.drain_pending();
        debug!(
            "Remote change at {} ({} coalesced)",
            change.path.display(),
            coalesced
        );
        Some(RemoteDataChanged {
            location: self.location.clone(),
            detected_at: change.detected_at,
        })
    }

    /// Forward events to a channel from a background task.
    ///
    /// The task ends when the subscription ends or the receiver is dropped.
    pub fn spawn(mut self) -> mpsc::Receiver<RemoteDataChanged> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            while let Some(event) = self.next().await {
                // An event already waiting will trigger the same reload.
                match tx.try_send(event) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            debug!("Change monitor for {} stopped", self.location.path.display());
        });
        rx
    }
}

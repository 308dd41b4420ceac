use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::StorageError;

/// Kind of access requested from the coordination scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationIntent {
    /// Shared access; excludes writers.
    Reading,
    /// Exclusive access for replacing the file's contents.
    WritingForReplacing,
}

impl fmt::Display for CoordinationIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinationIntent::Reading => write!(f, "read"),
            CoordinationIntent::WritingForReplacing => write!(f, "write-for-replacing"),
        }
    }
}

/// An open coordination scope around one file.
///
/// The scope is released when the guard is dropped, on every exit path.
/// Operations must target [`CoordinationGuard::path`], which is the path the
/// substrate hands out and may differ from the logical path.
pub struct CoordinationGuard {
    path: PathBuf,
    intent: CoordinationIntent,
    _token: Box<dyn Send + Sync>,
}

impl CoordinationGuard {
    /// Wrap a substrate-specific token; dropping the token ends the scope.
    pub fn new(path: PathBuf, intent: CoordinationIntent, token: impl Send + Sync + 'static) -> Self {
        Self {
            path,
            intent,
            _token: Box::new(token),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn intent(&self) -> CoordinationIntent {
        self.intent
    }
}

impl fmt::Debug for CoordinationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinationGuard")
            .field("path", &self.path)
            .field("intent", &self.intent)
            .finish_non_exhaustive()
    }
}

/// An unresolved conflicting revision left next to the tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRevision {
    /// Where the revision's contents can be read.
    pub path: PathBuf,
    /// Last modification time, if the substrate knows it.
    pub modified_at: Option<DateTime<Utc>>,
}

/// Notification that the tracked file (or one of its revisions) changed.
#[derive(Debug, Clone)]
pub struct RemoteChange {
    /// Path the notification was raised for
    pub path: PathBuf,
    /// When the change was observed
    pub detected_at: DateTime<Utc>,
}

/// Stream of change notifications for one tracked file.
///
/// Keeps the substrate's subscription alive for as long as it exists.
pub struct RemoteChanges {
    receiver: mpsc::Receiver<RemoteChange>,
    _subscription: Box<dyn Send>,
}

impl RemoteChanges {
    pub fn new(receiver: mpsc::Receiver<RemoteChange>, subscription: impl Send + 'static) -> Self {
        Self {
            receiver,
            _subscription: Box::new(subscription),
        }
    }

    /// Next notification. `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<RemoteChange> {
        self.receiver.recv().await
    }

    /// Drain notifications that are already queued without waiting.
    pub fn drain_pending(&mut self) -> usize {
        let mut drained = 0;
        while self.receiver.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

impl fmt::Debug for RemoteChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteChanges").finish_non_exhaustive()
    }
}

/// Capabilities a file-synchronization substrate provides.
///
/// Each platform supplies its own implementation:
/// - Sync folders (Syncthing, Dropbox, ...): advisory locks, conflicted-copy
///   files, filesystem events
/// - Platform document stores: native coordinators and version stores
///
/// These operations are only used for cloud-backed locations; local-only
/// storage does plain atomic file I/O without a substrate.
#[async_trait]
pub trait SyncSubstrate: Send + Sync {
    /// Returns the substrate identifier (e.g., "sync-folder").
    fn backend_name(&self) -> &'static str;

    /// Open a coordination scope on `path` for the given kind of access.
    ///
    /// Blocks until the scope is granted. Release is tied to the guard.
    async fn coordinate(
        &self,
        path: &Path,
        intent: CoordinationIntent,
    ) -> Result<CoordinationGuard, StorageError>;

    /// List unresolved conflicting revisions of `path`, excluding the current one.
    async fn conflicting_revisions(&self, path: &Path) -> Result<Vec<ConflictRevision>, StorageError>;

    /// Discard revisions that have been merged into the current one.
    async fn discard_resolved_revisions(
        &self,
        path: &Path,
        resolved: &[ConflictRevision],
    ) -> Result<(), StorageError>;

    /// Move a local file into synchronized storage at `destination`.
    ///
    /// Move semantics: the source no longer exists afterwards.
    async fn move_into_synced_storage(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<(), StorageError>;

    /// Subscribe to change notifications for `path`.
    ///
    /// Delivery is at-least-once; duplicates and delays are possible.
    async fn subscribe(&self, path: &Path) -> Result<RemoteChanges, StorageError>;
}

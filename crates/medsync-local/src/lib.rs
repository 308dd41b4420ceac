//! Sync-folder storage for medsync.
//!
//! Keeps the medication collection in a folder synchronized by an external
//! daemon, falling back to a device-local directory when that folder is not
//! available. Loads reconcile the daemon's conflicted copies, the first run
//! with a synced folder migrates local data into it, and a watcher reports
//! remote edits.

pub mod config;
pub mod display;
pub mod io;
pub mod locator;
pub mod lock;
pub mod migration;
pub mod monitor;
pub mod persistence;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod watch;

pub use io::CoordinatedIo;
pub use locator::{Location, LocationKind, StorageLocator};
pub use migration::{MigrationManager, MigrationOutcome};
pub use monitor::{ChangeMonitor, RemoteDataChanged};
pub use persistence::Persistence;
pub use resolver::{ConflictResolver, ReconcileOutcome};
pub use store::{MedicationStore, SortOption, StoreEvent};
pub use sync::SyncFolderSubstrate;

use std::path::{Path, PathBuf};

use tracing::warn;

/// Name of the persisted collection file.
pub const DEFAULT_FILE_NAME: &str = "medications.json";

/// Stable identifier of the synced container inside the cloud folder.
pub const DEFAULT_CONTAINER_ID: &str = "medsync.MedicationTracker";

/// Whether a location lives in synced storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Local,
    Cloud,
}

impl std::fmt::Display for LocationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationKind::Local => write!(f, "local"),
            LocationKind::Cloud => write!(f, "cloud"),
        }
    }
}

/// A resolved file location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: PathBuf,
    pub kind: LocationKind,
}

impl Location {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: LocationKind::Local,
        }
    }

    pub fn cloud(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: LocationKind::Cloud,
        }
    }

    pub fn is_cloud(&self) -> bool {
        self.kind == LocationKind::Cloud
    }
}

/// Resolves where the collection is stored.
///
/// Layout:
/// ```text
/// {local_dir}/medications.json                         (local sandbox)
/// {cloud_root}/{container_id}/Documents/medications.json (synced folder)
/// ```
///
/// The cloud folder counts as available while `cloud_root` exists. This is
/// checked on every call because the folder can appear or vanish while the
/// process runs (sync client signed in or out, drive unmounted).
#[derive(Debug, Clone)]
pub struct StorageLocator {
    local_dir: PathBuf,
    cloud_root: Option<PathBuf>,
    container_id: String,
    file_name: String,
}

impl StorageLocator {
    pub fn new(local_dir: impl AsRef<Path>, cloud_root: Option<PathBuf>) -> Self {
        Self {
            local_dir: local_dir.as_ref().to_path_buf(),
            cloud_root,
            container_id: DEFAULT_CONTAINER_ID.to_string(),
            file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }

    pub fn with_container_id(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = container_id.into();
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Whether the synced folder is reachable right now.
    pub fn cloud_available(&self) -> bool {
        self.cloud_root.as_ref().is_some_and(|root| root.is_dir())
    }

    /// The local sandbox location, creating its directory if needed.
    pub fn local_location(&self) -> Location {
        ensure_dir(&self.local_dir);
        Location::local(self.local_dir.join(&self.file_name))
    }

    /// The synced location, or `None` while the cloud folder is unavailable.
    pub fn cloud_location(&self) -> Option<Location> {
        if !self.cloud_available() {
            return None;
        }
        let documents = self
            .cloud_root
            .as_ref()?
            .join(&self.container_id)
            .join("Documents");
        ensure_dir(&documents);
        Some(Location::cloud(documents.join(&self.file_name)))
    }

    /// The one location reads and writes go to: cloud when available, else local.
    pub fn effective_location(&self) -> Location {
        self.cloud_location()
            .unwrap_or_else(|| self.local_location())
    }
}

fn ensure_dir(dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Failed to create directory {}: {}", dir.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_only() {
        let temp = TempDir::new().unwrap();
        let locator = StorageLocator::new(temp.path().join("local"), None);

        assert!(!locator.cloud_available());
        assert!(locator.cloud_location().is_none());

        let location = locator.effective_location();
        assert_eq!(location.kind, LocationKind::Local);
        assert_eq!(location.path, temp.path().join("local").join(DEFAULT_FILE_NAME));
        assert!(temp.path().join("local").is_dir());
    }

    #[test]
    fn test_cloud_preferred_when_present() {
        let temp = TempDir::new().unwrap();
        let cloud_root = temp.path().join("Sync");
        std::fs::create_dir_all(&cloud_root).unwrap();

        let locator = StorageLocator::new(temp.path().join("local"), Some(cloud_root.clone()))
            .with_container_id("test.container");

        let location = locator.effective_location();
        assert!(location.is_cloud());
        assert_eq!(
            location.path,
            cloud_root
                .join("test.container")
                .join("Documents")
                .join(DEFAULT_FILE_NAME)
        );
        assert!(location.path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_availability_is_re_evaluated() {
        let temp = TempDir::new().unwrap();
        let cloud_root = temp.path().join("Sync");
        let locator = StorageLocator::new(temp.path().join("local"), Some(cloud_root.clone()));

        // Configured but not mounted yet.
        assert!(!locator.cloud_available());
        assert_eq!(locator.effective_location().kind, LocationKind::Local);

        std::fs::create_dir_all(&cloud_root).unwrap();
        assert!(locator.cloud_available());
        assert_eq!(locator.effective_location().kind, LocationKind::Cloud);

        std::fs::remove_dir_all(&cloud_root).unwrap();
        assert!(!locator.cloud_available());
        assert_eq!(locator.effective_location().kind, LocationKind::Local);
    }
}

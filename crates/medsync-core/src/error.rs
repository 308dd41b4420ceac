use thiserror::Error;

/// Errors that can occur in the persistence and sync layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Coordination error: {0}")]
    Coordination(String),

    #[error("Failed to persist merged revisions: {0}")]
    MergePersist(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl StorageError {
    /// Whether this error means "there is no file yet".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

mod sync_folder;

pub use sync_folder::{is_conflict_copy, SyncFolderSubstrate};

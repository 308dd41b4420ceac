//! Core types for medsync persistence and multi-device sync.
//!
//! This crate is free of any particular storage substrate:
//! - `Medication`, `DoseRecord`: the persisted domain model
//! - `codec`: canonical JSON form, with legacy decode support
//! - `merge`: per-field reconciliation of concurrent revisions
//! - `SyncSubstrate`: file coordination, conflict revisions, change notifications

pub mod codec;
mod error;
pub mod merge;
mod model;
mod substrate;

pub use error::StorageError;
pub use merge::{merge_collections, merge_medication, MergeAccumulator};
pub use model::{validate_frequency, DoseRecord, Medication, DUE_SOON_WINDOW_MINUTES};
pub use substrate::{
    ConflictRevision, CoordinationGuard, CoordinationIntent, RemoteChange, RemoteChanges,
    SyncSubstrate,
};

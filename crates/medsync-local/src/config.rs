use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use crate::locator::{StorageLocator, DEFAULT_CONTAINER_ID};
use crate::store::SortOption;

/// Configuration for the medsync CLI.
#[derive(Parser, Debug, Clone)]
#[command(name = "medsync")]
#[command(about = "Track medication doses, synced across devices through a shared folder")]
pub struct Config {
    /// Directory for the device-local copy
    #[arg(long, global = true, env = "MEDSYNC_LOCAL_DIR")]
    pub local_dir: Option<PathBuf>,

    /// Root of the folder kept in sync by Syncthing, Dropbox, etc.
    /// Without it, data stays local.
    #[arg(long, global = true, env = "MEDSYNC_CLOUD_DIR")]
    pub cloud_dir: Option<PathBuf>,

    /// Container directory inside the synced folder
    #[arg(long, global = true, default_value = DEFAULT_CONTAINER_ID, env = "MEDSYNC_CONTAINER_ID")]
    pub container_id: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List medications with their due status
    List {
        #[arg(long, value_enum, default_value_t = SortOption::ByDueDate)]
        sort: SortOption,
    },
    /// Add a medication
    Add {
        name: String,
        /// Hours between doses
        #[arg(long)]
        every: f64,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Record a dose, now or at a given time
    Give {
        /// Id, id prefix, or name
        medication: String,
        /// When the dose was taken (RFC 3339)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Show a medication's dose history
    History { medication: String },
    /// Remove one dose from a medication's history
    DeleteDose { medication: String, dose_id: String },
    /// Change a medication's name, interval, or notes
    Edit {
        medication: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        every: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Remove a medication
    Remove { medication: String },
    /// Show where data is stored and whether conflicts are pending
    Status,
    /// Follow remote changes until Ctrl+C
    Watch {
        #[arg(long, value_enum, default_value_t = SortOption::ByDueDate)]
        sort: SortOption,
    },
}

impl Config {
    /// Get the effective local directory.
    pub fn effective_local_dir(&self) -> PathBuf {
        self.local_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("MedicationTracker")
        })
    }

    pub fn locator(&self) -> StorageLocator {
        StorageLocator::new(self.effective_local_dir(), self.cloud_dir.clone())
            .with_container_id(self.container_id.clone())
    }
}

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::Parser;
use medsync_core::{validate_frequency, Medication, SyncSubstrate};
use tokio::signal;
use tokio::sync::watch as tokio_watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use medsync_local::config::{Command, Config};
use medsync_local::display::{format_date, format_frequency, format_relative_due};
use medsync_local::{MedicationStore, Persistence, SortOption, SyncFolderSubstrate};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let locator = config.locator();

    let substrate: Arc<dyn SyncSubstrate> = Arc::new(SyncFolderSubstrate::new());
    let persistence = Arc::new(Persistence::new(locator, substrate));

    let outcome = persistence.migrate().await;
    info!("Migration: {:?}", outcome);

    let mut store = MedicationStore::open(persistence.clone()).await;

    match config.command {
        Command::List { sort } => print_list(&store, sort),
        Command::Add { name, every, notes } => {
            let medication = Medication::new(name, every, notes)?;
            let id = medication.id;
            store.add_medication(medication).await;
            println!("Added {}", id);
        }
        Command::Give {
            medication,
            at,
            note,
        } => {
            let found = store.find(&medication)?;
            let (id, name) = (found.id, found.name.clone());
            let at = at.unwrap_or_else(Utc::now);
            let dose_id = store
                .give_dose(id, at, note)
                .await
                .ok_or_else(|| anyhow!("medication {} disappeared", id))?;
            println!("Gave {} at {} (dose {})", name, format_date(at), dose_id);
        }
        Command::History { medication } => {
            let found = store.find(&medication)?;
            println!("{} ({})", found.name, format_frequency(found.frequency_hours));
            if found.dose_history.is_empty() {
                println!("  No doses recorded");
            }
            for dose in found.dose_history.iter().rev() {
                if dose.note.is_empty() {
                    println!("  {}  {}", format_date(dose.date), dose.id);
                } else {
                    println!("  {}  {}  {}", format_date(dose.date), dose.id, dose.note);
                }
            }
        }
        Command::DeleteDose {
            medication,
            dose_id,
        } => {
            let found = store.find(&medication)?;
            let matches: Vec<_> = found
                .dose_history
                .iter()
                .filter(|d| d.id.to_string().starts_with(&dose_id.to_lowercase()))
                .map(|d| d.id)
                .collect();
            let medication_id = found.id;
            let dose = match matches.as_slice() {
                [only] => *only,
                [] => bail!("no dose matches '{}'", dose_id),
                _ => bail!("'{}' matches {} doses", dose_id, matches.len()),
            };
            store.delete_dose(medication_id, dose).await;
            println!("Deleted dose {}", dose);
        }
        Command::Edit {
            medication,
            name,
            every,
            notes,
        } => {
            let mut edited = store.find(&medication)?.clone();
            if let Some(name) = name {
                edited.name = name;
            }
            if let Some(every) = every {
                validate_frequency(every)?;
                edited.frequency_hours = every;
            }
            if let Some(notes) = notes {
                edited.notes = notes;
            }
            let name = edited.name.clone();
            store.update_medication(edited).await;
            println!("Updated {}", name);
        }
        Command::Remove { medication } => {
            let found = store.find(&medication)?;
            let (id, name) = (found.id, found.name.clone());
            store.delete_medication(id).await;
            println!("Removed {}", name);
        }
        Command::Status => {
            let location = persistence.effective_location();
            println!(
                "Cloud storage: {}",
                if persistence.cloud_available() {
                    "available"
                } else {
                    "unavailable"
                }
            );
            println!("Data file:     {} ({})", location.path.display(), location.kind);
            println!("Medications:   {}", store.medications().len());
            let conflicts = persistence
                .pending_conflicts()
                .await
                .context("Failed to list conflicting revisions")?;
            println!("Conflicts:     {}", conflicts);
        }
        Command::Watch { sort } => watch(&mut store, sort).await?,
    }

    Ok(())
}

fn print_list(store: &MedicationStore, sort: SortOption) {
    let now = Utc::now();
    let medications = store.sorted(sort, now);
    if medications.is_empty() {
        println!("No medications. Add one with `medsync add <name> --every <hours>`.");
        return;
    }

    for medication in medications {
        let status = match medication.next_due_date() {
            Some(due) => format_relative_due(due, now),
            None => "Not yet given".to_string(),
        };
        let marker = if medication.is_overdue(now) {
            "!"
        } else if medication.is_due_soon(now) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<24} {:<18} {}  [{}]",
            marker,
            medication.name,
            format_frequency(medication.frequency_hours),
            status,
            &medication.id.to_string()[..8]
        );
    }
}

async fn watch(store: &mut MedicationStore, sort: SortOption) -> anyhow::Result<()> {
    let Some(monitor) = store.persistence().watch().await? else {
        bail!("No synced folder available; pass --cloud-dir to watch for remote changes");
    };
    info!("Watching {}", monitor.location().path.display());

    let mut changes = monitor.spawn();
    let mut shutdown_rx = create_shutdown_signal();

    print_list(store, sort);
    loop {
        tokio::select! {
            change = changes.recv() => {
                let Some(change) = change else {
                    warn!("Change monitor stopped");
                    break;
                };
                store.handle_remote_change(&change).await;
                println!();
                print_list(store, sort);
            }
            _ = shutdown_rx.wait_for(|&v| v) => break,
        }
    }

    info!("Stopped watching");
    Ok(())
}

/// Create a shutdown signal that triggers on Ctrl+C or SIGTERM.
fn create_shutdown_signal() -> tokio_watch::Receiver<bool> {
    let (tx, rx) = tokio_watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down"),
                Err(e) => {
                    warn!("Failed to install Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, shutting down");
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}

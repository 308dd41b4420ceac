use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use medsync_core::{validate_frequency, DoseRecord, Medication, StorageError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::monitor::RemoteDataChanged;
use crate::persistence::Persistence;

const EVENT_CAPACITY: usize = 16;

/// Notifications delivered to store subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A local mutation was applied and persisted.
    Changed,
    /// The collection was reloaded after a remote change.
    RemoteDataChanged,
}

/// List orderings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SortOption {
    /// Overdue first, then by next due time; never-given last
    #[default]
    #[value(name = "due")]
    ByDueDate,
    /// Case-insensitive name
    #[value(name = "name")]
    ByName,
}

/// The in-memory collection, owned by the application.
///
/// Every mutation applies to memory, persists, refreshes from the persisted
/// state, then notifies subscribers. Persist failures are logged; the
/// in-memory state is then kept and lands with the next successful save.
pub struct MedicationStore {
    persistence: Arc<Persistence>,
    medications: Vec<Medication>,
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for MedicationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MedicationStore")
            .field("medications", &self.medications.len())
            .finish_non_exhaustive()
    }
}

impl MedicationStore {
    /// Create the store and load the current collection.
    pub async fn open(persistence: Arc<Persistence>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut store = Self {
            persistence,
            medications: Vec::new(),
            events,
        };
        store.reload().await;
        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn persistence(&self) -> &Arc<Persistence> {
        &self.persistence
    }

    pub fn medications(&self) -> &[Medication] {
        &self.medications
    }

    /// Replace the in-memory collection with what is persisted.
    pub async fn reload(&mut self) {
        self.medications = self.persistence.load().await;
        debug!("Store holds {} medication(s)", self.medications.len());
    }

    /// Reload after the monitor reported a remote change.
    ///
    /// Idempotent: the event only triggers a reload, its contents are not used.
    pub async fn handle_remote_change(&mut self, change: &RemoteDataChanged) {
        info!(
            "Remote change detected at {}, reloading",
            change.location.path.display()
        );
        self.reload().await;
        self.notify(StoreEvent::RemoteDataChanged);
    }

    /// Add a medication. Rejected if its id is already present or its
    /// interval is not a positive number of hours.
    pub async fn add_medication(&mut self, medication: Medication) -> bool {
        if let Err(e) = validate_frequency(medication.frequency_hours) {
            warn!("Rejecting medication {}: {}", medication.id, e);
            return false;
        }
        if self.index_of(medication.id).is_some() {
            warn!("Medication {} already exists", medication.id);
            return false;
        }
        self.medications.push(medication);
        self.commit().await;
        true
    }

    /// Replace the medication with the same id. Unknown ids are ignored.
    pub async fn update_medication(&mut self, medication: Medication) -> bool {
        if let Err(e) = validate_frequency(medication.frequency_hours) {
            warn!("Rejecting update of medication {}: {}", medication.id, e);
            return false;
        }
        let Some(index) = self.index_of(medication.id) else {
            debug!("Ignoring update of unknown medication {}", medication.id);
            return false;
        };
        self.medications[index] = medication;
        self.commit().await;
        true
    }

    pub async fn delete_medication(&mut self, id: Uuid) -> bool {
        let before = self.medications.len();
        self.medications.retain(|m| m.id != id);
        if self.medications.len() == before {
            return false;
        }
        self.commit().await;
        true
    }

    /// Record a dose at `at`. Returns the new dose's id.
    pub async fn give_dose(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
        note: impl Into<String>,
    ) -> Option<Uuid> {
        let index = self.index_of(id)?;
        let dose = DoseRecord::new(at, note);
        let dose_id = dose.id;
        let medication = &mut self.medications[index];
        medication.dose_history.push(dose);
        medication.sort_dose_history();
        self.commit().await;
        Some(dose_id)
    }

    pub async fn delete_dose(&mut self, medication_id: Uuid, dose_id: Uuid) -> bool {
        let Some(index) = self.index_of(medication_id) else {
            return false;
        };
        let history = &mut self.medications[index].dose_history;
        let before = history.len();
        history.retain(|d| d.id != dose_id);
        if history.len() == before {
            return false;
        }
        self.commit().await;
        true
    }

    /// Look up a medication by id, unique id prefix, or name (case-insensitive).
    pub fn find(&self, query: &str) -> Result<&Medication, StorageError> {
        if let Ok(id) = Uuid::parse_str(query) {
            if let Some(found) = self.medications.iter().find(|m| m.id == id) {
                return Ok(found);
            }
        }

        let needle = query.to_lowercase();
        if let Some(found) = self
            .medications
            .iter()
            .find(|m| m.name.to_lowercase() == needle)
        {
            return Ok(found);
        }

        let by_prefix: Vec<&Medication> = self
            .medications
            .iter()
            .filter(|m| !needle.is_empty() && m.id.to_string().starts_with(&needle))
            .collect();
        match by_prefix.as_slice() {
            [only] => Ok(only),
            [] => Err(StorageError::NotFound(format!("No medication matches '{}'", query))),
            _ => Err(StorageError::InvalidArgument(format!(
                "'{}' matches {} medications",
                query,
                by_prefix.len()
            ))),
        }
    }

    /// The collection in display order.
    pub fn sorted(&self, option: SortOption, now: DateTime<Utc>) -> Vec<&Medication> {
        let mut sorted: Vec<&Medication> = self.medications.iter().collect();
        match option {
            SortOption::ByDueDate => sorted.sort_by(|a, b| compare_by_due(a, b, now)),
            SortOption::ByName => sorted.sort_by(|a, b| {
                a.name
                    .to_lowercase()
                    .cmp(&b.name.to_lowercase())
                    .then_with(|| a.name.cmp(&b.name))
            }),
        }
        sorted
    }

    fn index_of(&self, id: Uuid) -> Option<usize> {
        self.medications.iter().position(|m| m.id == id)
    }

    async fn commit(&mut self) {
        match self.persistence.try_save(&self.medications).await {
            Ok(()) => self.refresh().await,
            Err(e) => error!("Failed to save medications: {}", e),
        }
        self.notify(StoreEvent::Changed);
    }

    /// Pick up what reconciliation made of the write. A failed load keeps
    /// the in-memory state.
    async fn refresh(&mut self) {
        match self.persistence.try_load().await {
            Ok(medications) => self.medications = medications,
            Err(e) => warn!("Failed to refresh after save: {}", e),
        }
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn compare_by_due(a: &Medication, b: &Medication, now: DateTime<Utc>) -> Ordering {
    b.is_overdue(now)
        .cmp(&a.is_overdue(now))
        .then_with(|| match (a.next_due_date(), b.next_due_date()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.name.cmp(&b.name))
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// How close to the next due time a medication counts as "due soon".
pub const DUE_SOON_WINDOW_MINUTES: i64 = 30;

/// A single administered dose.
///
/// Fields are declared in key order so the serialized form has sorted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseRecord {
    pub date: DateTime<Utc>,
    pub id: Uuid,
    #[serde(default)]
    pub note: String,
}

impl DoseRecord {
    /// Create a dose record with a fresh id.
    pub fn new(date: DateTime<Utc>, note: impl Into<String>) -> Self {
        Self {
            date,
            id: Uuid::new_v4(),
            note: note.into(),
        }
    }
}

/// A tracked medication with its dosing interval and dose history.
///
/// Deserialization goes through [`crate::codec::MedicationRecord`] so the
/// legacy `lastGivenDate` layout is still accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "crate::codec::MedicationRecord")]
pub struct Medication {
    pub dose_history: Vec<DoseRecord>,
    pub frequency_hours: f64,
    pub id: Uuid,
    pub name: String,
    pub notes: String,
}

impl Medication {
    /// Create a medication with a fresh id and an empty history.
    pub fn new(
        name: impl Into<String>,
        frequency_hours: f64,
        notes: impl Into<String>,
    ) -> Result<Self, StorageError> {
        validate_frequency(frequency_hours)?;
        Ok(Self {
            dose_history: Vec::new(),
            frequency_hours,
            id: Uuid::new_v4(),
            name: name.into(),
            notes: notes.into(),
        })
    }

    /// Most recent dose time.
    pub fn last_given_date(&self) -> Option<DateTime<Utc>> {
        self.dose_history.iter().map(|d| d.date).max()
    }

    /// When the next dose is due, if one was ever given.
    ///
    /// `None` also when the interval runs past the representable range.
    pub fn next_due_date(&self) -> Option<DateTime<Utc>> {
        let millis = (self.frequency_hours * 3_600_000.0).round();
        if !(millis.is_finite() && millis.abs() < i64::MAX as f64) {
            return None;
        }
        let interval = Duration::try_milliseconds(millis as i64)?;
        self.last_given_date()?.checked_add_signed(interval)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.next_due_date().is_some_and(|due| now > due)
    }

    pub fn is_due_soon(&self, now: DateTime<Utc>) -> bool {
        match self.next_due_date() {
            Some(due) => {
                due <= now + Duration::minutes(DUE_SOON_WINDOW_MINUTES) && !self.is_overdue(now)
            }
            None => false,
        }
    }

    /// Keep the history in timestamp order (ties by id).
    pub fn sort_dose_history(&mut self) {
        self.dose_history
            .sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    }
}

/// `frequencyHours` must be a finite, positive number of hours.
pub fn validate_frequency(frequency_hours: f64) -> Result<(), StorageError> {
    if frequency_hours.is_finite() && frequency_hours > 0.0 {
        Ok(())
    } else {
        Err(StorageError::InvalidArgument(format!(
            "frequencyHours must be positive, got {}",
            frequency_hours
        )))
    }
}

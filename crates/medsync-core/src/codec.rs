//! Canonical on-disk form of the medication collection.
//!
//! The document is a pretty-printed JSON array with sorted keys and RFC 3339
//! UTC timestamps:
//!
//! ```json
//! [
//!   {
//!     "doseHistory": [
//!       { "date": "2024-01-01T08:00:00Z", "id": "…", "note": "" }
//!     ],
//!     "frequencyHours": 8.0,
//!     "id": "…",
//!     "name": "Aspirin",
//!     "notes": ""
//!   }
//! ]
//! ```
//!
//! Older documents stored a single `lastGivenDate` instead of `doseHistory`;
//! those are still readable but never written.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::StorageError;
use crate::merge::{union_doses, MergeAccumulator};
use crate::model::{validate_frequency, DoseRecord, Medication};

/// Wire layout accepted on read, including the legacy scalar field.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MedicationRecord {
    id: Uuid,
    name: String,
    frequency_hours: f64,
    #[serde(default)]
    dose_history: Option<Vec<DoseRecord>>,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    last_given_date: Option<DateTime<Utc>>,
}

impl TryFrom<MedicationRecord> for Medication {
    type Error = StorageError;

    fn try_from(record: MedicationRecord) -> Result<Self, Self::Error> {
        validate_frequency(record.frequency_hours)
            .map_err(|e| StorageError::Decode(format!("medication {}: {}", record.id, e)))?;

        let dose_history = match (record.dose_history, record.last_given_date) {
            (Some(history), _) => union_doses(&history, &[]),
            (None, Some(date)) => vec![legacy_dose(record.id, date)],
            (None, None) => Vec::new(),
        };

        Ok(Medication {
            dose_history,
            frequency_hours: record.frequency_hours,
            id: record.id,
            name: record.name,
            notes: record.notes,
        })
    }
}

/// Dose synthesized from a legacy `lastGivenDate`.
///
/// The id is derived from the medication id and the timestamp so every
/// device upgrading the same document produces the same dose id.
fn legacy_dose(medication_id: Uuid, date: DateTime<Utc>) -> DoseRecord {
    let name = date.to_rfc3339_opts(SecondsFormat::AutoSi, true);
    DoseRecord {
        date,
        id: Uuid::new_v5(&medication_id, name.as_bytes()),
        note: String::new(),
    }
}

/// Serialize a collection to its canonical bytes.
pub fn encode(medications: &[Medication]) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec_pretty(medications)
        .map_err(|e| StorageError::InvalidArgument(format!("Failed to encode medications: {}", e)))
}

/// Parse a document back into a collection.
///
/// Medications sharing an id inside one document are folded together with
/// the merge rule.
pub fn decode(bytes: &[u8]) -> Result<Vec<Medication>, StorageError> {
    let medications: Vec<Medication> =
        serde_json::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))?;

    let mut acc = MergeAccumulator::new();
    acc.absorb_all(medications);
    Ok(acc.into_medications())
}

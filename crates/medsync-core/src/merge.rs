//! Reconciliation of two revisions of the same medication.
//!
//! Dose history is append-only, so both sides are unioned by dose id.
//! Scalar fields (`name`, `frequencyHours`, `notes`) are user-editable and
//! only one side can win: the side with the most recent dose. The rule is
//! commutative and idempotent so revisions can be folded in any order.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use uuid::Uuid;

use crate::model::{DoseRecord, Medication};

/// Merge two revisions of the medication with the same id.
pub fn merge_medication(a: &Medication, b: &Medication) -> Medication {
    debug_assert_eq!(a.id, b.id, "merging medications with different ids");

    let base = match a.last_given_date().cmp(&b.last_given_date()) {
        Ordering::Greater => a,
        Ordering::Less => b,
        // No activity signal; fall back to comparing the scalars so the
        // choice does not depend on argument order.
        Ordering::Equal => {
            if compare_scalars(b, a) == Ordering::Greater {
                b
            } else {
                a
            }
        }
    };

    Medication {
        dose_history: union_doses(&a.dose_history, &b.dose_history),
        frequency_hours: base.frequency_hours,
        id: base.id,
        name: base.name.clone(),
        notes: base.notes.clone(),
    }
}

/// Union two dose histories keyed by dose id, sorted by timestamp.
///
/// When both sides carry the same id with different contents, the record
/// with the later `(date, note)` wins.
pub fn union_doses(a: &[DoseRecord], b: &[DoseRecord]) -> Vec<DoseRecord> {
    let mut by_id: HashMap<Uuid, DoseRecord> = HashMap::with_capacity(a.len() + b.len());
    for dose in a.iter().chain(b.iter()) {
        match by_id.entry(dose.id) {
            Entry::Occupied(mut existing) => {
                if compare_doses(dose, existing.get()) == Ordering::Greater {
                    existing.insert(dose.clone());
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(dose.clone());
            }
        }
    }

    let mut merged: Vec<DoseRecord> = by_id.into_values().collect();
    merged.sort_by(|x, y| x.date.cmp(&y.date).then_with(|| x.id.cmp(&y.id)));
    merged
}

fn compare_doses(x: &DoseRecord, y: &DoseRecord) -> Ordering {
    x.date.cmp(&y.date).then_with(|| x.note.cmp(&y.note))
}

fn compare_scalars(x: &Medication, y: &Medication) -> Ordering {
    x.name
        .cmp(&y.name)
        .then_with(|| x.frequency_hours.total_cmp(&y.frequency_hours))
        .then_with(|| x.notes.cmp(&y.notes))
}

/// Folds medications from several revisions into one collection.
///
/// Medications keep the order in which their id was first seen.
#[derive(Debug, Default)]
pub struct MergeAccumulator {
    order: Vec<Uuid>,
    by_id: HashMap<Uuid, Medication>,
}

impl MergeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a medication, merging it into an existing entry with the same id.
    ///
    /// Returns `true` if a merge happened.
    pub fn absorb(&mut self, medication: Medication) -> bool {
        match self.by_id.entry(medication.id) {
            Entry::Occupied(mut existing) => {
                let merged = merge_medication(existing.get(), &medication);
                existing.insert(merged);
                true
            }
            Entry::Vacant(slot) => {
                self.order.push(medication.id);
                slot.insert(medication);
                false
            }
        }
    }

    /// Absorb every medication of a revision. Returns how many were merged.
    pub fn absorb_all(&mut self, medications: impl IntoIterator<Item = Medication>) -> usize {
        medications
            .into_iter()
            .map(|m| self.absorb(m))
            .filter(|merged| *merged)
            .count()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn into_medications(mut self) -> Vec<Medication> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.remove(id))
            .collect()
    }
}

/// Merge two whole collections per id.
pub fn merge_collections(base: Vec<Medication>, incoming: Vec<Medication>) -> Vec<Medication> {
    let mut acc = MergeAccumulator::new();
    acc.absorb_all(base);
    acc.absorb_all(incoming);
    acc.into_medications()
}

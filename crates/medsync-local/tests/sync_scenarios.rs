//! End-to-end scenarios against a temporary directory acting as the synced folder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use medsync_core::{codec, merge_medication, DoseRecord, Medication};
use medsync_local::{MigrationOutcome, Persistence, StorageLocator, SyncFolderSubstrate};
use proptest::prelude::*;
use tempfile::TempDir;
use uuid::Uuid;

/// One device: its own local directory, a shared cloud root.
fn device(temp: &TempDir, name: &str) -> Persistence {
    let locator = StorageLocator::new(temp.path().join(name), Some(temp.path().join("Sync")));
    Persistence::new(locator, Arc::new(SyncFolderSubstrate::new()))
}

fn cloud_file(temp: &TempDir) -> PathBuf {
    temp.path()
        .join("Sync")
        .join("medsync.MedicationTracker")
        .join("Documents")
        .join("medications.json")
}

fn write_doc(path: &Path, medications: &[Medication]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, codec::encode(medications).unwrap()).unwrap();
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
}

#[tokio::test]
async fn migration_merges_local_into_cloud() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("Sync")).unwrap();
    let phone = device(&temp, "phone");

    let mut local = Medication::new("Aspirin", 8.0, "").unwrap();
    local.dose_history.push(DoseRecord::new(at(8), ""));
    let mut cloud = local.clone();
    cloud.dose_history = vec![DoseRecord::new(at(16), "")];

    let local_path = phone.locator().local_location().path;
    write_doc(&local_path, &[local]);
    write_doc(&cloud_file(&temp), &[cloud]);

    assert!(matches!(
        phone.migrate().await,
        MigrationOutcome::Merged {
            local_removed: true,
            ..
        }
    ));
    assert!(!local_path.exists());

    let loaded = phone.load().await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].frequency_hours, 8.0);
    let dates: Vec<_> = loaded[0].dose_history.iter().map(|d| d.date).collect();
    assert_eq!(dates, vec![at(8), at(16)]);
}

#[tokio::test]
async fn conflicting_rename_keeps_most_active_name() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("Sync")).unwrap();
    let laptop = device(&temp, "laptop");

    let first = DoseRecord::new(at(8), "");
    let mut original = Medication::new("Aspirin", 8.0, "").unwrap();
    original.dose_history.push(first.clone());
    let mut renamed = original.clone();
    renamed.name = "Aspirin (renamed)".to_string();
    renamed.dose_history.push(DoseRecord::new(at(20), ""));

    let current = cloud_file(&temp);
    write_doc(&current, std::slice::from_ref(&original));
    write_doc(
        &current.with_file_name("medications (conflicted copy 2024-05-01).json"),
        std::slice::from_ref(&renamed),
    );

    let loaded = laptop.load().await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name, "Aspirin (renamed)");
    assert_eq!(loaded[0].dose_history.len(), 2);
    assert_eq!(loaded[0].dose_history[0].id, first.id);
    assert_eq!(loaded[0].last_given_date(), Some(at(20)));
    assert_eq!(laptop.pending_conflicts().await.unwrap(), 0);
}

#[tokio::test]
async fn legacy_document_loads_as_history() {
    let temp = TempDir::new().unwrap();
    let offline = StorageLocator::new(temp.path().join("local"), None);
    let persistence = Persistence::new(offline, Arc::new(SyncFolderSubstrate::new()));

    let path = persistence.effective_location().path;
    std::fs::write(
        &path,
        br#"[{"frequencyHours": 12, "id": "6a0f6f2e-3c43-4a55-9b9e-1f0f7f1e2d3c", "lastGivenDate": "2024-05-01T08:00:00Z", "name": "Ibuprofen", "notes": ""}]"#,
    )
    .unwrap();

    let loaded = persistence.load().await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].dose_history.len(), 1);
    assert_eq!(loaded[0].last_given_date(), Some(at(8)));

    // Saving upgrades the file; the legacy key is never written back.
    persistence.try_save(&loaded).await.unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(!text.contains("lastGivenDate"));
    assert!(text.contains("doseHistory"));
}

#[tokio::test]
async fn devices_share_the_synced_file() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("Sync")).unwrap();
    let phone = device(&temp, "phone");
    let laptop = device(&temp, "laptop");

    let mut med = Medication::new("Vitamin D", 24.0, "").unwrap();
    phone.try_save(std::slice::from_ref(&med)).await.unwrap();
    assert_eq!(laptop.load().await, vec![med.clone()]);

    med.dose_history.push(DoseRecord::new(at(9), "with lunch"));
    laptop.try_save(std::slice::from_ref(&med)).await.unwrap();
    assert_eq!(phone.load().await, vec![med]);
}

fn arb_doses() -> impl Strategy<Value = Vec<DoseRecord>> {
    prop::collection::vec(0i64..72, 0..4).prop_map(|hours| {
        hours
            .into_iter()
            .map(|h| DoseRecord::new(at(0) + Duration::hours(h), ""))
            .collect()
    })
}

fn arb_side(ids: Vec<Uuid>) -> impl Strategy<Value = Vec<Medication>> {
    let names = prop::sample::select(vec!["Aspirin", "Zinc", "Melatonin"]);
    let slot = prop::option::of((names, 1u8..48, arb_doses()));
    prop::collection::vec(slot, ids.len()).prop_map(move |slots| {
        slots
            .into_iter()
            .zip(ids.iter())
            .filter_map(|(slot, id)| {
                slot.map(|(name, hours, mut doses)| {
                    doses.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
                    Medication {
                        dose_history: doses,
                        frequency_hours: f64::from(hours),
                        id: *id,
                        name: name.to_string(),
                        notes: String::new(),
                    }
                })
            })
            .collect()
    })
}

fn by_id(medications: Vec<Medication>) -> HashMap<Uuid, Medication> {
    medications.into_iter().map(|m| (m.id, m)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn migration_never_loses_data(
        (local, cloud) in {
            let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
            (arb_side(ids.clone()), arb_side(ids))
        }
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("Sync")).unwrap();
        let persistence = device(&temp, "phone");
        let local_path = persistence.locator().local_location().path;
        write_doc(&local_path, &local);
        write_doc(&cloud_file(&temp), &cloud);

        let outcome = runtime.block_on(persistence.migrate());
        let is_merged = matches!(outcome, MigrationOutcome::Merged { local_removed: true, .. });
        prop_assert!(is_merged);
        prop_assert!(!local_path.exists());

        let migrated = by_id(codec::decode(&std::fs::read(cloud_file(&temp)).unwrap()).unwrap());
        let mut expected = by_id(cloud);
        for med in local {
            let merged = match expected.get(&med.id) {
                Some(existing) => merge_medication(&med, existing),
                None => med,
            };
            expected.insert(merged.id, merged);
        }
        prop_assert_eq!(migrated, expected);
    }
}

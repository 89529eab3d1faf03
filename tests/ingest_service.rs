//! Ingestion service tests over the sqlite store.

use std::sync::{Arc, Barrier};
use tempfile::TempDir;

use greenloop::service::{parse_payload, SubmissionService, SubmitError};
use greenloop::store::{SqliteSubmissionStore, SubmissionStore};
use greenloop::{CategoryCounts, GeoPoint, OwnerIdentity, SubmissionPayload};

fn owner(id: &str) -> OwnerIdentity {
    OwnerIdentity {
        owner_id: id.to_string(),
        display_name: id.to_string(),
        avatar: None,
    }
}

fn payload(recyclable: u32, compost: u32, trash: u32) -> SubmissionPayload {
    SubmissionPayload {
        counts: CategoryCounts {
            recyclable,
            compost,
            trash,
        },
        last_detected_objects: Vec::new(),
        location: None,
    }
}

fn sqlite_service(dir: &TempDir) -> SubmissionService<SqliteSubmissionStore> {
    let db_path = dir.path().join("submissions.db");
    let store = SqliteSubmissionStore::open(db_path.to_str().unwrap()).unwrap();
    SubmissionService::new(store)
}

#[test]
fn valid_geojson_point_is_accepted() {
    let dir = TempDir::new().unwrap();
    let mut service = sqlite_service(&dir);
    let mut body = payload(1, 0, 0);
    body.location = Some(GeoPoint::new(-79.19, 43.79));
    let record = service.submit(&owner("a"), &body, None).unwrap();
    assert!(record.location.is_some());

    let aggregate = service.aggregate_for("a").unwrap().unwrap();
    assert_eq!(aggregate.location_history.len(), 1);
    assert_eq!(aggregate.location_history[0].latitude, 43.79);
}

#[test]
fn malformed_location_is_rejected_without_state_change() {
    let dir = TempDir::new().unwrap();
    let mut service = sqlite_service(&dir);
    service.submit(&owner("a"), &payload(1, 0, 0), None).unwrap();

    let raw = br#"{"counts": {"Trash": 1}, "location": {"type": "Point", "coordinates": ["x", 43.79]}}"#;
    let err = parse_payload(raw).unwrap_err();
    assert!(matches!(err, SubmitError::InvalidPayload(_)));

    // Totals are untouched by the rejected body.
    let aggregate = service.aggregate_for("a").unwrap().unwrap();
    assert_eq!(aggregate.total_items, 1);
    assert_eq!(aggregate.trash, 0);
}

#[test]
fn total_items_always_equals_category_sum() {
    let dir = TempDir::new().unwrap();
    let mut service = sqlite_service(&dir);
    for i in 0..20u32 {
        service
            .submit(&owner("a"), &payload(i % 3, i % 2, 1), None)
            .unwrap();
    }
    let aggregate = service.aggregate_for("a").unwrap().unwrap();
    assert_eq!(
        aggregate.total_items,
        aggregate.compost + aggregate.recycle + aggregate.trash
    );
}

#[test]
fn concurrent_same_owner_submissions_lose_no_updates() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("concurrent.db");
    let db_path = db_path.to_str().unwrap().to_string();
    // Create the schema before the writers race.
    drop(SqliteSubmissionStore::open(&db_path).unwrap());

    const WRITERS: usize = 8;
    const PER_WRITER: usize = 5;
    let barrier = Arc::new(Barrier::new(WRITERS));
    let mut handles = Vec::new();
    for _ in 0..WRITERS {
        let barrier = barrier.clone();
        let db_path = db_path.clone();
        handles.push(std::thread::spawn(move || {
            let store = SqliteSubmissionStore::open(&db_path).unwrap();
            let mut service = SubmissionService::new(store);
            barrier.wait();
            for _ in 0..PER_WRITER {
                service
                    .submit(&owner("shared"), &payload(1, 0, 0), None)
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut store = SqliteSubmissionStore::open(&db_path).unwrap();
    let aggregate = store.aggregate_for("shared").unwrap().unwrap();
    assert_eq!(aggregate.recycle, (WRITERS * PER_WRITER) as u64);
    assert_eq!(aggregate.total_items, (WRITERS * PER_WRITER) as u64);
}

#[test]
fn leaderboard_orders_by_total_then_creation() {
    let dir = TempDir::new().unwrap();
    let mut service = sqlite_service(&dir);
    service.submit(&owner("first"), &payload(2, 0, 0), None).unwrap();
    service.submit(&owner("second"), &payload(0, 2, 0), None).unwrap();
    service.submit(&owner("third"), &payload(0, 0, 5), None).unwrap();

    let users = service.list_users().unwrap();
    let order: Vec<&str> = users.iter().map(|u| u.owner_id.as_str()).collect();
    // "third" leads; "first" and "second" tie at 2 and keep creation order.
    assert_eq!(order, ["third", "first", "second"]);
}

#[test]
fn media_blob_is_persisted_and_referenced() {
    let dir = TempDir::new().unwrap();
    let media_dir = dir.path().join("uploads");
    let mut service =
        sqlite_service(&dir).with_media_store(greenloop::MediaStore::open(&media_dir).unwrap());

    let record = service
        .submit(&owner("a"), &payload(1, 0, 0), Some(&[1, 2, 3]))
        .unwrap();
    let media_ref = record.media_ref.expect("media was provided");
    let stored = std::fs::read(media_dir.join(&media_ref)).unwrap();
    assert_eq!(stored, [1, 2, 3]);
}

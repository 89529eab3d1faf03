//! End-to-end capture session tests against stub hardware.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use greenloop::detect::Detection;
use greenloop::geo::{FixState, GeoGate, LocationFix, StubLocationProvider};
use greenloop::service::{InProcessSink, SubmissionService};
use greenloop::session::{SendFailure, SubmissionSink};
use greenloop::store::InMemorySubmissionStore;
use greenloop::{
    CameraSource, OwnerIdentity, ScriptedDetector, Session, SessionState, StubCamera,
    SubmissionPayload, SubmissionRecord,
};

fn owner() -> OwnerIdentity {
    OwnerIdentity {
        owner_id: "auth0|maya".to_string(),
        display_name: "Maya".to_string(),
        avatar: None,
    }
}

fn service() -> Arc<Mutex<SubmissionService<InMemorySubmissionStore>>> {
    Arc::new(Mutex::new(SubmissionService::new(
        InMemorySubmissionStore::new(),
    )))
}

struct FailingSink;

impl SubmissionSink for FailingSink {
    fn submit(
        &mut self,
        _payload: &SubmissionPayload,
        _media: &[u8],
    ) -> Result<SubmissionRecord, SendFailure> {
        Err(SendFailure::Transport("connection refused".to_string()))
    }
}

#[test]
fn counts_accumulate_above_threshold_only() {
    let mut session = Session::new(
        StubCamera::new(8, 8),
        ScriptedDetector::new(vec![
            vec![
                Detection::new("bottle", 0.9),
                Detection::new("banana", 0.5),
            ],
            // At and below the threshold: both excluded.
            vec![
                Detection::new("cup", 0.45),
                Detection::new("paper", 0.2),
            ],
        ]),
        GeoGate::unsupported(),
    );

    session.acquire().unwrap();
    session.start_recording().unwrap();
    let first = session.process_next_frame().unwrap().unwrap();
    assert_eq!(first.len(), 2);
    let second = session.process_next_frame().unwrap().unwrap();
    assert!(second.is_empty());

    let counts = session.summary().counts;
    assert_eq!(counts.recyclable, 1);
    assert_eq!(counts.compost, 1);
    assert_eq!(counts.trash, 0);
}

#[test]
fn person_detections_are_listed_but_never_counted() {
    let mut session = Session::new(
        StubCamera::new(8, 8),
        ScriptedDetector::new(vec![vec![
            Detection::new("person", 0.99),
            Detection::new("bottle", 0.8),
        ]]),
        GeoGate::unsupported(),
    );
    session.acquire().unwrap();
    session.start_recording().unwrap();
    let detections = session.process_next_frame().unwrap().unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(session.summary().counts.recyclable, 1);
    assert_eq!(session.summary().counts.total(), 1);
}

#[test]
fn full_session_reaches_sent_success_with_location() {
    let geo = GeoGate::new(Arc::new(StubLocationProvider::Immediate(LocationFix {
        latitude: 43.79,
        longitude: -79.19,
        accuracy_m: 5.0,
        captured_at_ms: 0,
    })));
    let mut session = Session::new(
        StubCamera::new(8, 8),
        ScriptedDetector::new(vec![vec![Detection::new("bottle", 0.9)]]),
        geo,
    );

    session.acquire().unwrap();
    session
        .geo()
        .wait_until_settled(Duration::from_secs(2));
    session.start_recording().unwrap();
    session.process_next_frame().unwrap();
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!session.camera().is_open());

    let service = service();
    let mut sink = InProcessSink::new(service.clone(), owner());
    let record = session.send(&mut sink).unwrap();
    assert_eq!(session.state(), SessionState::SentSuccess);
    assert_eq!(record.recycle, 1);
    let location = record.location.expect("fix was acquired before send");
    assert_eq!(location.latitude(), 43.79);
    assert_eq!(location.longitude(), -79.19);

    let users = service.lock().unwrap().list_users().unwrap();
    assert_eq!(users[0].total_items, 1);
    assert_eq!(users[0].location_history.len(), 1);
}

#[test]
fn geo_timeout_still_allows_send_without_location() {
    let geo = GeoGate::with_timeout(
        Arc::new(StubLocationProvider::Slow(
            Duration::from_secs(5),
            LocationFix {
                latitude: 0.0,
                longitude: 0.0,
                accuracy_m: 1.0,
                captured_at_ms: 0,
            },
        )),
        Duration::from_millis(30),
    );
    let mut session = Session::new(
        StubCamera::new(8, 8),
        ScriptedDetector::new(vec![vec![Detection::new("banana", 0.8)]]),
        geo,
    );

    session.acquire().unwrap();
    assert_eq!(
        session.geo().wait_until_settled(Duration::from_secs(2)),
        FixState::Denied
    );
    session.start_recording().unwrap();
    session.process_next_frame().unwrap();
    session.stop().unwrap();

    let service = service();
    let mut sink = InProcessSink::new(service.clone(), owner());
    let record = session.send(&mut sink).unwrap();
    assert!(record.location.is_none());
    assert_eq!(record.compost, 1);
}

#[test]
fn restarting_a_recording_zeroes_the_summary() {
    let mut session = Session::new(
        StubCamera::new(8, 8),
        ScriptedDetector::new(vec![
            vec![Detection::new("bottle", 0.9)],
            vec![Detection::new("banana", 0.9)],
        ]),
        GeoGate::unsupported(),
    );
    session.acquire().unwrap();
    session.start_recording().unwrap();
    session.process_next_frame().unwrap();
    assert_eq!(session.summary().counts.recyclable, 1);

    // Abandon this recording without stopping and begin again.
    // (Recording cannot be restarted directly; a new session can.)
    let mut fresh = Session::new(
        StubCamera::new(8, 8),
        ScriptedDetector::new(vec![vec![Detection::new("banana", 0.9)]]),
        GeoGate::unsupported(),
    );
    fresh.acquire().unwrap();
    fresh.start_recording().unwrap();
    assert_eq!(fresh.summary().counts.total(), 0);
    fresh.process_next_frame().unwrap();
    assert_eq!(fresh.summary().counts.compost, 1);
    assert_eq!(fresh.summary().counts.recyclable, 0);
}

#[test]
fn send_failure_is_terminal_with_no_retry() {
    let mut session = Session::new(
        StubCamera::new(8, 8),
        ScriptedDetector::new(vec![vec![Detection::new("bottle", 0.9)]]),
        GeoGate::unsupported(),
    );
    session.acquire().unwrap();
    session.start_recording().unwrap();
    session.process_next_frame().unwrap();
    session.stop().unwrap();

    let mut sink = FailingSink;
    assert!(session.send(&mut sink).is_err());
    assert_eq!(session.state(), SessionState::SendError);

    // The artifact was consumed; a second send cannot happen.
    assert!(session.send(&mut sink).is_err());
    assert_eq!(session.state(), SessionState::SendError);
    assert!(session.accepted_record().is_none());
}

#[test]
fn camera_is_released_when_session_is_dropped_mid_recording() {
    use greenloop::capture::{CameraSource, Frame};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TrackedCamera {
        inner: StubCamera,
        open_flag: Arc<AtomicBool>,
    }
    impl CameraSource for TrackedCamera {
        fn open(&mut self) -> anyhow::Result<()> {
            self.inner.open()?;
            self.open_flag.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn next_frame(&mut self) -> anyhow::Result<Frame> {
            self.inner.next_frame()
        }
        fn release(&mut self) {
            self.inner.release();
            self.open_flag.store(false, Ordering::SeqCst);
        }
        fn is_open(&self) -> bool {
            self.inner.is_open()
        }
    }

    let open_flag = Arc::new(AtomicBool::new(false));
    let camera = TrackedCamera {
        inner: StubCamera::new(8, 8),
        open_flag: open_flag.clone(),
    };
    let mut session = Session::new(camera, ScriptedDetector::empty(), GeoGate::unsupported());
    session.acquire().unwrap();
    session.start_recording().unwrap();
    assert!(open_flag.load(Ordering::SeqCst));
    drop(session);
    assert!(!open_flag.load(Ordering::SeqCst));
}

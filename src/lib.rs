//! GreenLoop capture core.
//!
//! This crate implements the detection-to-submission pipeline of a
//! litter-collection app:
//!
//! 1. A capture session pulls frames from a camera, runs an object detector,
//!    and classifies each detection into a disposal category.
//! 2. Per-frame counts accumulate into a session summary while recording.
//! 3. A best-effort geolocation fix is acquired alongside the session and
//!    attached at send time if available.
//! 4. A finished session is submitted to the ingestion service, which
//!    validates the payload, durably records it, and folds the counts into
//!    the owner's running aggregate.
//! 5. A leaderboard projection ranks aggregates on demand.
//!
//! # Module Structure
//!
//! - `classify`: label → disposal category rule table
//! - `detect`: detector backend trait and detection types
//! - `capture`: frame source trait (camera abstraction)
//! - `session`: the capture session state machine
//! - `geo`: best-effort geolocation gate
//! - `service`: submission validation and ingestion
//! - `store`: durable submission/aggregate stores (sqlite, in-memory)
//! - `leaderboard`: ranking projection
//! - `api`: HTTP surface for submissions and the leaderboard
//! - `config`: service configuration (file + env)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod capture;
pub mod classify;
pub mod config;
pub mod detect;
pub mod geo;
pub mod leaderboard;
pub mod service;
pub mod session;
#[cfg(feature = "http-sink")]
pub mod sink_http;
pub mod store;

pub use capture::{CameraSource, Frame, StubCamera};
pub use classify::{classify, Category};
pub use detect::{BoundingBox, Detection, Detector, ScriptedDetector};
pub use geo::{FixState, GeoGate, LocationFix, LocationProvider, StubLocationProvider};
pub use leaderboard::{level_for_total, rank};
pub use service::{InProcessSink, SubmissionService, SubmitError};
pub use session::{
    AcquisitionError, SendFailure, Session, SessionState, SessionSummary, SubmissionSink,
};
pub use store::{InMemorySubmissionStore, MediaStore, SqliteSubmissionStore, SubmissionStore};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> Result<u64> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(now.as_millis() as u64)
}

// -------------------- Wire Types --------------------

/// Per-category item counts as reported by the client session.
///
/// Missing categories default to zero; negative or non-integer counts fail
/// deserialization and are rejected as invalid payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    #[serde(rename = "Recyclable", default)]
    pub recyclable: u32,
    #[serde(rename = "Compost", default)]
    pub compost: u32,
    #[serde(rename = "Trash", default)]
    pub trash: u32,
}

impl CategoryCounts {
    pub fn total(&self) -> u64 {
        self.recyclable as u64 + self.compost as u64 + self.trash as u64
    }
}

/// One classified detection as carried in a submission payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    pub category: Category,
    #[serde(rename = "score")]
    pub confidence: f32,
}

/// GeoJSON-like point: `coordinates` is `[longitude, latitude]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [longitude, latitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}

/// The body of a finished session's submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionPayload {
    #[serde(default)]
    pub counts: CategoryCounts,
    #[serde(rename = "lastDetectedObjects", default)]
    pub last_detected_objects: Vec<DetectedObject>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

// -------------------- Server-Owned Records --------------------

/// The identity an accepted submission is attributed to.
///
/// Token issuance and validation belong to the external identity provider;
/// the pipeline only sees the resolved identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerIdentity {
    pub owner_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Durable record of one accepted submission. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub owner_id: String,
    pub compost: u32,
    pub recycle: u32,
    pub trash: u32,
    pub created_at: u64,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub media_ref: Option<String>,
}

/// One point in an owner's deposit history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepositPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: u64,
}

/// Running per-owner totals derived from accepted submissions.
///
/// Invariant: `total_items` always equals `compost + recycle + trash`; the
/// store recomputes it inside the same mutation that applies the deltas.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserAggregate {
    pub owner_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub compost: u64,
    pub recycle: u64,
    pub trash: u64,
    pub total_items: u64,
    pub level: u32,
    #[serde(default)]
    pub location_history: Vec<DepositPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_default_missing_categories_to_zero() {
        let counts: CategoryCounts = serde_json::from_str(r#"{"Recyclable": 3}"#).unwrap();
        assert_eq!(counts.recyclable, 3);
        assert_eq!(counts.compost, 0);
        assert_eq!(counts.trash, 0);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn counts_reject_negative_values() {
        let parsed: Result<CategoryCounts, _> = serde_json::from_str(r#"{"Trash": -1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn geo_point_round_trips_lng_lat_order() {
        let point = GeoPoint::new(-79.19, 43.79);
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"][0], -79.19);
        assert_eq!(json["coordinates"][1], 43.79);
        assert_eq!(point.longitude(), -79.19);
        assert_eq!(point.latitude(), 43.79);
    }
}

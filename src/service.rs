//! Submission ingestion service.
//!
//! Validates a finished session's payload, persists the media blob, and
//! records the submission atomically with the owner's aggregate update.
//! Validation failures reject the payload before anything is persisted;
//! storage failures are transient and safe to retry with the same payload
//! because no partial state is committed.

use anyhow::Result;
use std::sync::{Arc, Mutex};

use crate::leaderboard::rank;
use crate::session::{SendFailure, SubmissionSink};
use crate::store::{MediaStore, NewSubmission, SubmissionStore};
use crate::{
    now_ms, GeoPoint, OwnerIdentity, SubmissionPayload, SubmissionRecord, UserAggregate,
};

/// Why a submission was not recorded.
#[derive(Debug)]
pub enum SubmitError {
    /// Malformed payload; rejected before persistence. The client must not
    /// retry it unmodified.
    InvalidPayload(String),
    /// Storage failed; nothing was committed, retrying the identical
    /// payload is safe.
    Persistence(anyhow::Error),
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::InvalidPayload(msg) => write!(f, "invalid payload: {}", msg),
            SubmitError::Persistence(err) => write!(f, "persistence failure: {}", err),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmitError::InvalidPayload(_) => None,
            SubmitError::Persistence(err) => err.source(),
        }
    }
}

/// Parse a raw JSON body into a payload, mapping any shape or type error
/// (string coordinates, negative counts, wrong nesting) to `InvalidPayload`.
pub fn parse_payload(body: &[u8]) -> Result<SubmissionPayload, SubmitError> {
    serde_json::from_slice(body).map_err(|e| SubmitError::InvalidPayload(e.to_string()))
}

/// Check the semantic constraints serde cannot express.
pub fn validate_payload(payload: &SubmissionPayload) -> Result<(), SubmitError> {
    if let Some(location) = &payload.location {
        validate_location(location)?;
    }
    Ok(())
}

fn validate_location(point: &GeoPoint) -> Result<(), SubmitError> {
    if point.kind != "Point" {
        return Err(SubmitError::InvalidPayload(format!(
            "unrecognized location geometry {:?}",
            point.kind
        )));
    }
    let [longitude, latitude] = point.coordinates;
    if !longitude.is_finite() || !latitude.is_finite() {
        return Err(SubmitError::InvalidPayload(
            "location coordinates must be finite numbers".to_string(),
        ));
    }
    if !(-180.0..=180.0).contains(&longitude) || !(-90.0..=90.0).contains(&latitude) {
        return Err(SubmitError::InvalidPayload(format!(
            "location coordinates out of range: [{}, {}]",
            longitude, latitude
        )));
    }
    Ok(())
}

pub struct SubmissionService<S: SubmissionStore> {
    store: S,
    media: Option<MediaStore>,
}

impl<S: SubmissionStore> SubmissionService<S> {
    pub fn new(store: S) -> Self {
        Self { store, media: None }
    }

    pub fn with_media_store(mut self, media: MediaStore) -> Self {
        self.media = Some(media);
        self
    }

    pub fn store(&mut self) -> &mut S {
        &mut self.store
    }

    /// Accept one submission: validate, persist the media blob, then record
    /// the submission and aggregate deltas in one atomic store operation.
    pub fn submit(
        &mut self,
        owner: &OwnerIdentity,
        payload: &SubmissionPayload,
        media: Option<&[u8]>,
    ) -> Result<SubmissionRecord, SubmitError> {
        validate_payload(payload)?;

        // Media lands on disk before the record; a storage failure below can
        // orphan a file but never produce a record without its deltas.
        let media_ref = match (&self.media, media) {
            (Some(store), Some(bytes)) if !bytes.is_empty() => Some(
                store
                    .save(&owner.owner_id, bytes)
                    .map_err(SubmitError::Persistence)?,
            ),
            _ => None,
        };

        let submission = NewSubmission {
            compost: payload.counts.compost,
            recycle: payload.counts.recyclable,
            trash: payload.counts.trash,
            location: payload.location.clone(),
            media_ref,
            created_at: now_ms().map_err(SubmitError::Persistence)?,
        };

        let record = self
            .store
            .record_submission(owner, &submission)
            .map_err(SubmitError::Persistence)?;
        log::info!(
            "submission #{} accepted for {}: compost={} recycle={} trash={} location={}",
            record.id,
            record.owner_id,
            record.compost,
            record.recycle,
            record.trash,
            record.location.is_some(),
        );
        Ok(record)
    }

    /// Leaderboard listing: all aggregates, ranked.
    pub fn list_users(&mut self) -> Result<Vec<UserAggregate>> {
        Ok(rank(self.store.user_aggregates()?))
    }

    pub fn aggregate_for(&mut self, owner_id: &str) -> Result<Option<UserAggregate>> {
        self.store.aggregate_for(owner_id)
    }
}

/// Client-side sink that submits directly into an in-process service,
/// used by tests and the demo binary.
pub struct InProcessSink<S: SubmissionStore> {
    service: Arc<Mutex<SubmissionService<S>>>,
    owner: OwnerIdentity,
}

impl<S: SubmissionStore> InProcessSink<S> {
    pub fn new(service: Arc<Mutex<SubmissionService<S>>>, owner: OwnerIdentity) -> Self {
        Self { service, owner }
    }
}

impl<S: SubmissionStore> SubmissionSink for InProcessSink<S> {
    fn submit(
        &mut self,
        payload: &SubmissionPayload,
        media: &[u8],
    ) -> Result<SubmissionRecord, SendFailure> {
        let mut service = self
            .service
            .lock()
            .map_err(|_| SendFailure::Transport("ingestion service poisoned".to_string()))?;
        service
            .submit(&self.owner, payload, Some(media))
            .map_err(|err| match err {
                SubmitError::InvalidPayload(msg) => SendFailure::Rejected(msg),
                SubmitError::Persistence(err) => SendFailure::Transport(err.to_string()),
            })
    }
}

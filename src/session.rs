//! Capture session state machine.
//!
//! One session owns the camera stream, the detector, and the geolocation
//! gate, and walks the lifecycle
//! `Idle → CameraReady → Recording → Stopped → Sending → {SentSuccess |
//! SendError}`. Camera or model acquisition failure is terminal
//! (`CameraError` / `ModelError`); a send failure is recoverable only by
//! abandoning the session and starting a new one.
//!
//! The frame loop is cooperative: the host calls `process_next_frame` once
//! per frame-ready signal, so at most one detection call is ever in flight.

use anyhow::{anyhow, Result};

use crate::capture::CameraSource;
use crate::classify::{classify, Category};
use crate::detect::Detector;
use crate::geo::{FixState, GeoGate};
use crate::{CategoryCounts, DetectedObject, GeoPoint, SubmissionPayload, SubmissionRecord};

/// Detections at or below this confidence are discarded before
/// classification (the original client keeps `score > 0.45`).
pub const CONFIDENCE_THRESHOLD: f32 = 0.45;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CameraReady,
    Recording,
    /// Recording stopped; a frozen artifact is ready to send.
    Stopped,
    Sending,
    SentSuccess,
    SendError,
    CameraError,
    ModelError,
}

/// Mutable accumulator owned by one active capture session.
///
/// Counts accumulate across all processed frames of a recording;
/// `last_detections` is replaced with each frame's classified list.
#[derive(Clone, Debug, Default)]
pub struct SessionSummary {
    pub counts: CategoryCounts,
    pub last_detections: Vec<DetectedObject>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionResource {
    Camera,
    Model,
}

/// Terminal acquisition failure; the session cannot proceed and the user
/// must start over.
#[derive(Clone, Debug)]
pub struct AcquisitionError {
    pub resource: AcquisitionResource,
    pub message: String,
}

impl std::fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.resource {
            AcquisitionResource::Camera => write!(f, "camera unavailable: {}", self.message),
            AcquisitionResource::Model => write!(f, "model unavailable: {}", self.message),
        }
    }
}
impl std::error::Error for AcquisitionError {}

/// Why a send failed. Both variants land the session in `SendError`;
/// rejected payloads must not be retried verbatim, transport failures are
/// retryable only via a fresh session.
#[derive(Clone, Debug)]
pub enum SendFailure {
    Rejected(String),
    Transport(String),
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendFailure::Rejected(msg) => write!(f, "submission rejected: {}", msg),
            SendFailure::Transport(msg) => write!(f, "submission transport failed: {}", msg),
        }
    }
}
impl std::error::Error for SendFailure {}

/// Transport used to deliver a finished session to the ingestion service.
pub trait SubmissionSink {
    fn submit(
        &mut self,
        payload: &SubmissionPayload,
        media: &[u8],
    ) -> Result<SubmissionRecord, SendFailure>;
}

pub struct Session<C: CameraSource, D: Detector> {
    state: SessionState,
    camera: C,
    detector: D,
    geo: GeoGate,
    summary: SessionSummary,
    chunks: Vec<Vec<u8>>,
    artifact: Option<Vec<u8>>,
    accepted: Option<SubmissionRecord>,
    threshold: f32,
}

impl<C: CameraSource, D: Detector> Session<C, D> {
    pub fn new(camera: C, detector: D, geo: GeoGate) -> Self {
        Self {
            state: SessionState::Idle,
            camera,
            detector,
            geo,
            summary: SessionSummary::default(),
            chunks: Vec::new(),
            artifact: None,
            accepted: None,
            threshold: CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    pub fn geo(&self) -> &GeoGate {
        &self.geo
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    /// The record returned by the service after a successful send.
    pub fn accepted_record(&self) -> Option<&SubmissionRecord> {
        self.accepted.as_ref()
    }

    /// `Idle → CameraReady`: acquire the camera stream and load the model,
    /// then fire a best-effort location request (never blocks).
    pub fn acquire(&mut self) -> Result<(), AcquisitionError> {
        if self.state != SessionState::Idle {
            return Err(AcquisitionError {
                resource: AcquisitionResource::Camera,
                message: format!("acquire is only valid from Idle, not {:?}", self.state),
            });
        }

        if let Err(err) = self.camera.open() {
            self.state = SessionState::CameraError;
            return Err(AcquisitionError {
                resource: AcquisitionResource::Camera,
                message: err.to_string(),
            });
        }

        if let Err(err) = self.detector.load() {
            self.camera.release();
            self.state = SessionState::ModelError;
            return Err(AcquisitionError {
                resource: AcquisitionResource::Model,
                message: err.to_string(),
            });
        }

        self.state = SessionState::CameraReady;
        self.geo.request_fix();
        Ok(())
    }

    /// `CameraReady → Recording`: zero the summary and begin the frame loop.
    pub fn start_recording(&mut self) -> Result<()> {
        if self.state != SessionState::CameraReady {
            return Err(anyhow!(
                "start_recording is only valid from CameraReady, not {:?}",
                self.state
            ));
        }
        self.summary = SessionSummary::default();
        self.chunks.clear();
        self.artifact = None;
        // Refresh the fix right before recording, as the original client does.
        if self.geo.state() == FixState::Acquired {
            self.geo.request_fix();
        }
        self.state = SessionState::Recording;
        Ok(())
    }

    /// Process one frame: pull from the camera, detect, filter by
    /// confidence, classify, and fold into the summary.
    ///
    /// Returns `Ok(None)` when the session is not recording (the stop flag
    /// the cooperative loop checks each iteration), otherwise the frame's
    /// classified detections. `Ignored` detections appear in the list but
    /// are never counted.
    pub fn process_next_frame(&mut self) -> Result<Option<Vec<DetectedObject>>> {
        if self.state != SessionState::Recording {
            return Ok(None);
        }

        let frame = self.camera.next_frame()?;
        let detections = self.detector.detect(&frame)?;
        self.chunks.push(frame.pixels);

        let mut classified = Vec::new();
        for detection in detections {
            if detection.confidence <= self.threshold {
                continue;
            }
            let category = classify(&detection.label);
            match category {
                Category::Recyclable => self.summary.counts.recyclable += 1,
                Category::Compost => self.summary.counts.compost += 1,
                Category::Trash => self.summary.counts.trash += 1,
                Category::Ignored => {}
            }
            classified.push(DetectedObject {
                label: detection.label,
                category,
                confidence: detection.confidence,
            });
        }
        self.summary.last_detections = classified.clone();
        Ok(Some(classified))
    }

    /// `Recording → Stopped`: freeze the summary and artifact, release the
    /// camera.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != SessionState::Recording {
            return Err(anyhow!(
                "stop is only valid from Recording, not {:?}",
                self.state
            ));
        }
        self.artifact = Some(self.chunks.concat());
        self.chunks.clear();
        self.camera.release();
        self.state = SessionState::Stopped;
        Ok(())
    }

    /// `Stopped → Sending → {SentSuccess | SendError}`.
    ///
    /// Attaches the frozen summary and the current location fix (if any)
    /// into one payload. There is no automatic retry: the artifact is
    /// consumed regardless of outcome.
    pub fn send(&mut self, sink: &mut dyn SubmissionSink) -> Result<SubmissionRecord> {
        if self.state != SessionState::Stopped {
            return Err(anyhow!(
                "send is only valid from Stopped, not {:?}",
                self.state
            ));
        }
        let media = self
            .artifact
            .take()
            .ok_or_else(|| anyhow!("no completed recording artifact to send"))?;

        let payload = SubmissionPayload {
            counts: self.summary.counts,
            last_detected_objects: self.summary.last_detections.clone(),
            location: self
                .geo
                .current_fix()
                .map(|fix| GeoPoint::new(fix.longitude, fix.latitude)),
        };

        self.state = SessionState::Sending;
        match sink.submit(&payload, &media) {
            Ok(record) => {
                self.state = SessionState::SentSuccess;
                self.accepted = Some(record.clone());
                Ok(record)
            }
            Err(failure) => {
                log::warn!("session send failed: {}", failure);
                self.state = SessionState::SendError;
                Err(failure.into())
            }
        }
    }
}

impl<C: CameraSource, D: Detector> Drop for Session<C, D> {
    fn drop(&mut self) {
        // The camera must be released on every exit path, teardown included.
        self.camera.release();
    }
}

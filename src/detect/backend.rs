use anyhow::Result;

use crate::capture::Frame;
use crate::detect::Detection;

/// Object detector backend.
///
/// The model itself is a black box: given a frame, it returns labeled,
/// scored, axis-aligned boxes. Implementations must treat the frame as
/// read-only and ephemeral, and must not be called re-entrantly; the
/// session drives one `detect` call at a time.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Load model weights or otherwise prepare the backend.
    ///
    /// A failure here is terminal for the session (`ModelError`).
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

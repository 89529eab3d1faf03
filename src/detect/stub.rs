use anyhow::{anyhow, Result};

use crate::capture::Frame;
use crate::detect::{Detection, Detector};

/// Scripted detector for tests and demos.
///
/// Returns one pre-programmed detection list per frame, in order; once the
/// script is exhausted it reports empty frames. Can be configured to fail
/// at load time to exercise the `ModelError` path.
pub struct ScriptedDetector {
    script: Vec<Vec<Detection>>,
    cursor: usize,
    fail_load: bool,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script,
            cursor: 0,
            fail_load: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing_load() -> Self {
        Self {
            script: Vec::new(),
            cursor: 0,
            fail_load: true,
        }
    }

    /// Number of frames processed so far.
    pub fn frames_seen(&self) -> usize {
        self.cursor
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn load(&mut self) -> Result<()> {
        if self.fail_load {
            return Err(anyhow!("scripted detector configured to fail load"));
        }
        Ok(())
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        let detections = self.script.get(self.cursor).cloned().unwrap_or_default();
        self.cursor += 1;
        Ok(detections)
    }
}

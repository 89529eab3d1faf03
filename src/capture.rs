//! Camera abstraction.
//!
//! The browser media stream of the original client is modeled as an injected
//! `CameraSource`: the session opens it once, pulls frames cooperatively
//! while recording, and releases it on every exit path. The stream is
//! exclusively held by the active session.

use anyhow::{anyhow, Result};

/// One visual frame as delivered by a camera source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }
}

/// Exclusive camera stream held by one capture session.
pub trait CameraSource: Send {
    /// Acquire the stream. A failure here is terminal (`CameraError`).
    fn open(&mut self) -> Result<()>;

    /// Pull the next frame. Only valid between `open` and `release`.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the stream. Must be safe to call more than once.
    fn release(&mut self);

    fn is_open(&self) -> bool;
}

/// In-memory camera for tests and demos: serves a fixed synthetic frame.
pub struct StubCamera {
    width: u32,
    height: u32,
    open: bool,
    fail_open: bool,
    frames_served: usize,
}

impl StubCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            open: false,
            fail_open: false,
            frames_served: 0,
        }
    }

    pub fn failing_open() -> Self {
        Self {
            width: 0,
            height: 0,
            open: false,
            fail_open: true,
            frames_served: 0,
        }
    }

    pub fn frames_served(&self) -> usize {
        self.frames_served
    }
}

impl CameraSource for StubCamera {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("stub camera configured to fail open"));
        }
        self.open = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("camera stream is not open"));
        }
        self.frames_served += 1;
        let len = (self.width * self.height) as usize;
        Ok(Frame::new(vec![0u8; len], self.width, self.height))
    }

    fn release(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

//! Best-effort geolocation gate.
//!
//! A fix request is fire-and-forget: it runs on its own thread, bounded by a
//! timeout, and writes the shared fix slot atomically when it settles. The
//! capture session never waits on it; absence of a fix at send time is valid.

use anyhow::Result;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Default bound on one fix acquisition, matching the original client.
pub const DEFAULT_FIX_TIMEOUT: Duration = Duration::from_secs(10);

/// A single-shot position fix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
    pub captured_at_ms: u64,
}

/// Lifecycle of the shared fix slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixState {
    NotRequested,
    Requesting,
    Acquired,
    Denied,
    NotSupported,
}

/// Device geolocation capability. `acquire` may block up to its own internal
/// bound; the gate enforces an outer timeout regardless.
pub trait LocationProvider: Send + Sync {
    fn acquire(&self) -> Result<LocationFix>;
}

struct FixSlot {
    state: FixState,
    fix: Option<LocationFix>,
}

/// Owns the shared fix slot and drives acquisitions.
///
/// May be re-invoked to refresh the fix; the last completed successful
/// acquisition wins. A failed or timed-out request never clears a previously
/// acquired fix.
pub struct GeoGate {
    provider: Option<Arc<dyn LocationProvider>>,
    slot: Arc<Mutex<FixSlot>>,
    timeout: Duration,
}

impl GeoGate {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self::with_timeout(provider, DEFAULT_FIX_TIMEOUT)
    }

    pub fn with_timeout(provider: Arc<dyn LocationProvider>, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            slot: Arc::new(Mutex::new(FixSlot {
                state: FixState::NotRequested,
                fix: None,
            })),
            timeout,
        }
    }

    /// A gate with no geolocation capability at all.
    pub fn unsupported() -> Self {
        Self {
            provider: None,
            slot: Arc::new(Mutex::new(FixSlot {
                state: FixState::NotSupported,
                fix: None,
            })),
            timeout: DEFAULT_FIX_TIMEOUT,
        }
    }

    /// Kick off one acquisition. Returns immediately.
    pub fn request_fix(&self) {
        let Some(provider) = self.provider.clone() else {
            let mut slot = self.slot.lock().expect("geo slot poisoned");
            slot.state = FixState::NotSupported;
            return;
        };

        {
            let mut slot = self.slot.lock().expect("geo slot poisoned");
            slot.state = FixState::Requesting;
        }

        let slot = self.slot.clone();
        let timeout = self.timeout;
        thread::spawn(move || {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                // Receiver may be gone if the outer wait timed out.
                let _ = tx.send(provider.acquire());
            });

            let outcome = rx.recv_timeout(timeout);
            let mut slot = slot.lock().expect("geo slot poisoned");
            match outcome {
                Ok(Ok(fix)) => {
                    slot.fix = Some(fix);
                    slot.state = FixState::Acquired;
                }
                Ok(Err(err)) => {
                    log::warn!("location fix denied: {}", err);
                    settle_failed(&mut slot);
                }
                Err(_) => {
                    log::warn!("location fix timed out after {:?}", timeout);
                    settle_failed(&mut slot);
                }
            }
        });
    }

    pub fn state(&self) -> FixState {
        self.slot.lock().expect("geo slot poisoned").state
    }

    /// The most recent successful fix, if any.
    pub fn current_fix(&self) -> Option<LocationFix> {
        self.slot.lock().expect("geo slot poisoned").fix
    }

    /// Test helper: block until the gate leaves `Requesting` or the deadline
    /// passes. Production code never waits on the gate.
    pub fn wait_until_settled(&self, deadline: Duration) -> FixState {
        let start = std::time::Instant::now();
        loop {
            let state = self.state();
            if state != FixState::Requesting || start.elapsed() >= deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

fn settle_failed(slot: &mut FixSlot) {
    // Keep an earlier successful fix; only the state degrades.
    if slot.fix.is_some() {
        slot.state = FixState::Acquired;
    } else {
        slot.state = FixState::Denied;
    }
}

/// Scriptable provider for tests and demos.
pub enum StubLocationProvider {
    /// Resolve immediately with the given fix.
    Immediate(LocationFix),
    /// Fail immediately (permission denied).
    Deny,
    /// Sleep for the given duration before resolving; used to exercise the
    /// gate-side timeout.
    Slow(Duration, LocationFix),
}

impl LocationProvider for StubLocationProvider {
    fn acquire(&self) -> Result<LocationFix> {
        match self {
            StubLocationProvider::Immediate(fix) => Ok(*fix),
            StubLocationProvider::Deny => Err(anyhow::anyhow!("location permission denied")),
            StubLocationProvider::Slow(delay, fix) => {
                thread::sleep(*delay);
                Ok(*fix)
            }
        }
    }
}

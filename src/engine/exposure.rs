//! Per-instrument single-exposure claims.
//!
//! At most one of {open Position, PendingRetest} may exist per instrument.
//! The ledger and the retest queue each guard their own data; this guard
//! is the single atomic gate that makes the invariant hold across them
//! under concurrent signal generation and retest-fill races. A claim is
//! taken when a signal is accepted (immediate entry or retest enqueue) and
//! held through the whole lifecycle: it is released only when the position
//! closes, the retest expires, or order placement fails.

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
pub struct ExposureGuard {
    engaged: Mutex<HashSet<String>>,
}

impl ExposureGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic test-and-set. Returns false if the instrument is already
    /// engaged; the caller must then drop the signal.
    pub fn try_claim(&self, instrument: &str) -> bool {
        self.lock().insert(instrument.to_string())
    }

    pub fn release(&self, instrument: &str) {
        self.lock().remove(instrument);
    }

    pub fn is_engaged(&self, instrument: &str) -> bool {
        self.lock().contains(instrument)
    }

    pub fn engaged_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.engaged.lock().expect("exposure guard poisoned")
    }
}

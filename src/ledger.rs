//! Authoritative local record of open positions.
//!
//! One coarse lock guards the whole book: position counts are small and
//! every operation is a short critical section, so contention is not a
//! concern. The lock is never held across a network call. Stop mutation
//! goes through `update_stop`, a tighten-only ratchet, so the monotonic
//! stop invariant is enforced here rather than at every call site.

use crate::domain::Position;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

/// Result of a stop update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMove {
    Tightened,
    /// Candidate would have loosened the stop (or matched it); ignored.
    Unchanged,
}

#[derive(Default)]
pub struct PositionLedger {
    positions: Mutex<HashMap<String, Position>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Position>> {
        self.positions.lock().expect("position ledger poisoned")
    }

    /// Add a freshly opened position. Rejects an instrument that already
    /// holds one — a second entry would double real exposure.
    pub fn add(&self, position: Position) -> Result<()> {
        let mut book = self.lock();
        if book.contains_key(&position.instrument) {
            return Err(EngineError::Validation(format!(
                "position already open for {}",
                position.instrument
            )));
        }
        book.insert(position.instrument.clone(), position);
        Ok(())
    }

    pub fn remove(&self, instrument: &str) -> Option<Position> {
        self.lock().remove(instrument)
    }

    pub fn get(&self, instrument: &str) -> Option<Position> {
        self.lock().get(instrument).cloned()
    }

    /// Defensive copy of every open position.
    pub fn get_all(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        all
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.lock().contains_key(instrument)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record a new peak favorable price if `price` improves on it.
    pub fn update_peak(&self, instrument: &str, price: Decimal) -> bool {
        let mut book = self.lock();
        match book.get_mut(instrument) {
            Some(pos) if pos.improves_peak(price) => {
                pos.peak_favorable_price = price;
                true
            }
            _ => false,
        }
    }

    /// Move the stop to the entry price, once. Returns the (from, to) pair
    /// on the first call; `None` if the position is gone or the stop
    /// already moved.
    pub fn move_stop_to_breakeven(&self, instrument: &str) -> Option<(Decimal, Decimal)> {
        let mut book = self.lock();
        let pos = book.get_mut(instrument)?;
        if pos.breakeven_moved {
            return None;
        }
        let from = pos.stop_loss;
        pos.stop_loss = pos.entry_price;
        pos.breakeven_moved = true;
        Some((from, pos.entry_price))
    }

    /// Tighten-only stop ratchet: a long stop only ever moves up, a short
    /// stop only ever moves down. A loosening candidate is ignored, not an
    /// error.
    pub fn update_stop(&self, instrument: &str, candidate: Decimal) -> Result<StopMove> {
        let mut book = self.lock();
        let pos = book.get_mut(instrument).ok_or_else(|| {
            EngineError::Validation(format!("no open position for {}", instrument))
        })?;
        if pos.tightens_stop(candidate) {
            pos.stop_loss = candidate;
            Ok(StopMove::Tightened)
        } else {
            Ok(StopMove::Unchanged)
        }
    }
}

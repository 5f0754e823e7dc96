//! Pullback-confirmation queue for breakout entries.
//!
//! A breakout signal does not order immediately: it waits here for price
//! to come back and touch the breakout level within a tolerance band. Per
//! instrument the state machine is NONE → PENDING → {FILLED | EXPIRED}.
//! Expiry is checked before the touch, so an entry past its deadline can
//! never place an order. The queue hands out trigger events and the caller
//! places the order with no queue lock held; a triggered entry stays in
//! the map marked in-flight until the caller confirms the fill
//! (`complete`) or gives up (`abandon`).

use crate::domain::PendingRetest;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RetestConfig {
    /// Width of the qualifying band as a fraction of the breakout price,
    /// e.g. 0.004 = price within 0.4% pullback of the level.
    pub tolerance_pct: Decimal,
}

impl Default for RetestConfig {
    fn default() -> Self {
        Self {
            tolerance_pct: Decimal::new(4, 3),
        }
    }
}

/// Transition surfaced by a poll pass.
#[derive(Debug, Clone)]
pub enum RetestEvent {
    /// Price touched the band; place the entry at the retest price.
    Triggered {
        retest: PendingRetest,
        retest_price: Decimal,
    },
    /// Deadline passed with no qualifying touch; no order, ever.
    Expired(PendingRetest),
}

struct Slot {
    retest: PendingRetest,
    in_flight: bool,
}

pub struct RetestWaitQueue {
    cfg: RetestConfig,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RetestWaitQueue {
    pub fn new(cfg: RetestConfig) -> Self {
        Self {
            cfg,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().expect("retest queue poisoned")
    }

    /// Queue a breakout for retest confirmation. An instrument already
    /// PENDING keeps its original entry; the new signal is ignored.
    pub fn try_enqueue(&self, retest: PendingRetest) -> bool {
        let mut slots = self.lock();
        if slots.contains_key(&retest.instrument) {
            return false;
        }
        slots.insert(
            retest.instrument.clone(),
            Slot {
                retest,
                in_flight: false,
            },
        );
        true
    }

    pub fn is_pending(&self, instrument: &str) -> bool {
        self.lock().contains_key(instrument)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<PendingRetest> {
        let mut all: Vec<PendingRetest> =
            self.lock().values().map(|s| s.retest.clone()).collect();
        all.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        all
    }

    /// One monitoring pass. Expired entries are removed and reported;
    /// qualifying touches are marked in-flight and reported with the
    /// current price. With `fills_enabled` false (order placement
    /// suspended) only expiries are processed.
    pub fn poll<P>(&self, now: DateTime<Utc>, price_of: P, fills_enabled: bool) -> Vec<RetestEvent>
    where
        P: Fn(&str) -> Option<Decimal>,
    {
        let mut events = Vec::new();
        let mut slots = self.lock();

        let mut expired: Vec<String> = Vec::new();
        for (instrument, slot) in slots.iter_mut() {
            if slot.in_flight {
                continue;
            }
            if now > slot.retest.deadline {
                expired.push(instrument.clone());
                continue;
            }
            if !fills_enabled {
                continue;
            }
            let price = match price_of(instrument) {
                Some(p) => p,
                None => continue,
            };
            if self.qualifies(&slot.retest, price) {
                slot.in_flight = true;
                events.push(RetestEvent::Triggered {
                    retest: slot.retest.clone(),
                    retest_price: price,
                });
            }
        }

        for instrument in expired {
            if let Some(slot) = slots.remove(&instrument) {
                events.push(RetestEvent::Expired(slot.retest));
            }
        }
        events
    }

    /// The triggered order filled; the entry leaves the queue.
    pub fn complete(&self, instrument: &str) -> Option<PendingRetest> {
        self.lock().remove(instrument).map(|s| s.retest)
    }

    /// The triggered order could not be placed; drop the entry. The touch
    /// already happened, so re-arming would enter on stale evidence.
    pub fn abandon(&self, instrument: &str) -> Option<PendingRetest> {
        self.lock().remove(instrument).map(|s| s.retest)
    }

    fn qualifies(&self, retest: &PendingRetest, price: Decimal) -> bool {
        use crate::domain::Direction;
        let tol = retest.breakout_price * self.cfg.tolerance_pct;
        match retest.direction {
            // Longs qualify on a pullback into the band just under (or at)
            // the breakout level.
            Direction::Long => {
                price <= retest.breakout_price && price >= retest.breakout_price - tol
            }
            // Shorts mirror: a rebound into the band just over the level.
            Direction::Short => {
                price >= retest.breakout_price && price <= retest.breakout_price + tol
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    fn pending(instrument: &str, direction: Direction, breakout: Decimal) -> PendingRetest {
        let now = Utc::now();
        PendingRetest {
            instrument: instrument.to_string(),
            breakout_price: breakout,
            direction,
            stop_loss: match direction {
                Direction::Long => breakout - dec!(2),
                Direction::Short => breakout + dec!(2),
            },
            target: match direction {
                Direction::Long => breakout + dec!(6),
                Direction::Short => breakout - dec!(6),
            },
            quantity: dec!(1),
            created_at: now,
            deadline: now + ChronoDuration::minutes(30),
        }
    }

    fn queue() -> RetestWaitQueue {
        RetestWaitQueue::new(RetestConfig {
            tolerance_pct: dec!(0.004),
        })
    }

    #[test]
    fn second_breakout_for_pending_instrument_is_ignored() {
        let q = queue();
        assert!(q.try_enqueue(pending("ES", Direction::Long, dec!(100))));
        assert!(!q.try_enqueue(pending("ES", Direction::Long, dec!(101))));
        assert_eq!(q.len(), 1);
        assert_eq!(q.snapshot()[0].breakout_price, dec!(100));
    }

    #[test]
    fn pullback_into_band_triggers_at_current_price() {
        let q = queue();
        q.try_enqueue(pending("ES", Direction::Long, dec!(100)));

        // 0.2% pullback, inside the 0.4% band.
        let events = q.poll(Utc::now(), |_| Some(dec!(99.8)), true);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RetestEvent::Triggered { retest_price, .. } => {
                assert_eq!(*retest_price, dec!(99.8));
            }
            other => panic!("expected trigger, got {:?}", other),
        }
    }

    #[test]
    fn deep_pullback_outside_band_does_not_trigger() {
        let q = queue();
        q.try_enqueue(pending("ES", Direction::Long, dec!(100)));
        let events = q.poll(Utc::now(), |_| Some(dec!(99.5)), true);
        assert!(events.is_empty());
        assert!(q.is_pending("ES"));
    }

    #[test]
    fn short_retest_qualifies_on_rebound() {
        let q = queue();
        q.try_enqueue(pending("CL", Direction::Short, dec!(80)));
        // Rebound 0.25% above the broken level.
        let events = q.poll(Utc::now(), |_| Some(dec!(80.2)), true);
        assert!(matches!(events[0], RetestEvent::Triggered { .. }));
    }

    #[test]
    fn expired_entry_never_orders_even_on_a_touch() {
        let q = queue();
        let mut retest = pending("ES", Direction::Long, dec!(100));
        retest.deadline = Utc::now() - ChronoDuration::seconds(1);
        q.try_enqueue(retest);

        // Price is inside the band, but the deadline has passed.
        let events = q.poll(Utc::now(), |_| Some(dec!(99.9)), true);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RetestEvent::Expired(_)));
        assert!(!q.is_pending("ES"));
    }

    #[test]
    fn in_flight_entry_is_not_retriggered() {
        let q = queue();
        q.try_enqueue(pending("ES", Direction::Long, dec!(100)));
        let first = q.poll(Utc::now(), |_| Some(dec!(99.9)), true);
        assert_eq!(first.len(), 1);
        let second = q.poll(Utc::now(), |_| Some(dec!(99.9)), true);
        assert!(second.is_empty());

        q.complete("ES");
        assert!(!q.is_pending("ES"));
    }

    #[test]
    fn suspended_fills_still_expire() {
        let q = queue();
        let mut retest = pending("ES", Direction::Long, dec!(100));
        retest.deadline = Utc::now() - ChronoDuration::seconds(1);
        q.try_enqueue(retest);
        q.try_enqueue(pending("NQ", Direction::Long, dec!(200)));

        let events = q.poll(Utc::now(), |_| Some(dec!(199.5)), false);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RetestEvent::Expired(_)));
        // NQ would have triggered, but fills are disabled.
        assert!(q.is_pending("NQ"));
    }
}

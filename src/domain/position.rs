//! Position and pending-retest records.

use super::market::Direction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open position tracked by the ledger.
///
/// Owned exclusively by `PositionLedger`; protective levels are mutated
/// only through ledger methods so the monotonic stop invariant holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub target: Decimal,
    /// Set once the stop has been moved to the entry price.
    pub breakeven_moved: bool,
    /// Best price seen in the position's favor since entry.
    pub peak_favorable_price: Decimal,
    pub order_id: String,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// How far price has moved in the position's favor. Negative when the
    /// position is under water.
    pub fn favorable_excursion(&self, price: Decimal) -> Decimal {
        match self.direction {
            Direction::Long => price - self.entry_price,
            Direction::Short => self.entry_price - price,
        }
    }

    /// Entry-to-stop distance. Valid as the *initial* risk only while the
    /// stop has not been moved (the stop first moves at breakeven).
    pub fn risk_per_unit(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }

    pub fn is_stop_hit(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }

    pub fn is_target_hit(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price >= self.target,
            Direction::Short => price <= self.target,
        }
    }

    /// True if `candidate` is a strictly better peak than the recorded one.
    pub fn improves_peak(&self, candidate: Decimal) -> bool {
        match self.direction {
            Direction::Long => candidate > self.peak_favorable_price,
            Direction::Short => candidate < self.peak_favorable_price,
        }
    }

    /// True if `candidate` tightens the stop (never loosens it).
    pub fn tightens_stop(&self, candidate: Decimal) -> bool {
        match self.direction {
            Direction::Long => candidate > self.stop_loss,
            Direction::Short => candidate < self.stop_loss,
        }
    }
}

/// A breakout signal waiting for a pullback confirmation before the real
/// entry order is placed.
///
/// Exists only between breakout detection and either a qualifying touch
/// (order placement) or deadline expiry (cancellation). At most one per
/// instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRetest {
    pub instrument: String,
    pub breakout_price: Decimal,
    pub direction: Direction,
    pub stop_loss: Decimal,
    pub target: Decimal,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position {
            instrument: "ES".to_string(),
            direction: Direction::Long,
            entry_price: dec!(100),
            quantity: dec!(2),
            stop_loss: dec!(98),
            target: dec!(106),
            breakeven_moved: false,
            peak_favorable_price: dec!(100),
            order_id: "ord-1".to_string(),
            opened_at: Utc::now(),
        }
    }

    fn short_position() -> Position {
        Position {
            direction: Direction::Short,
            stop_loss: dec!(102),
            target: dec!(94),
            ..long_position()
        }
    }

    #[test]
    fn favorable_excursion_by_direction() {
        assert_eq!(long_position().favorable_excursion(dec!(103)), dec!(3));
        assert_eq!(short_position().favorable_excursion(dec!(97)), dec!(3));
        assert_eq!(long_position().favorable_excursion(dec!(99)), dec!(-1));
    }

    #[test]
    fn stop_and_target_hits() {
        let long = long_position();
        assert!(long.is_stop_hit(dec!(98)));
        assert!(long.is_stop_hit(dec!(97.5)));
        assert!(!long.is_stop_hit(dec!(98.01)));
        assert!(long.is_target_hit(dec!(106)));

        let short = short_position();
        assert!(short.is_stop_hit(dec!(102)));
        assert!(short.is_target_hit(dec!(94)));
        assert!(!short.is_target_hit(dec!(94.5)));
    }

    #[test]
    fn stop_tightening_by_direction() {
        let long = long_position();
        assert!(long.tightens_stop(dec!(99)));
        assert!(!long.tightens_stop(dec!(97)));
        assert!(!long.tightens_stop(dec!(98)));

        let short = short_position();
        assert!(short.tightens_stop(dec!(101)));
        assert!(!short.tightens_stop(dec!(103)));
    }
}

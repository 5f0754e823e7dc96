//! Market data primitives: ticks, bars and venue-reported positions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single trade print from the market feed.
///
/// Ticks are ephemeral: they are folded into bars by the aggregator and
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub price: Decimal,
    pub size: Option<Decimal>,
    pub ts: DateTime<Utc>,
}

/// Fixed-interval OHLCV summary of ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    /// Interval start; ticks with `start <= ts < start + interval` belong here.
    pub start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    /// Size of the full bar range, high to low.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    /// True candle body, open to close.
    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }
}

/// An open position as reported by the venue, used during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub instrument: String,
    pub direction: Direction,
    pub quantity: Decimal,
    pub avg_price: Decimal,
}

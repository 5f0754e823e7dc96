//! Market data feed boundary.
//!
//! The wire protocol client is an external collaborator; the engine only
//! sees this trait. Failures surface as typed `FeedError`s so the feed
//! pump can distinguish reconnectable conditions from fatal ones.

pub mod sim;

pub use sim::{SimFeed, SimFeedConfig};

use crate::domain::Tick;
use crate::error::FeedError;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;

/// A historical bar as delivered by the venue, stamped in venue-local
/// time. The aggregator normalizes these to UTC before merging.
#[derive(Debug, Clone)]
pub struct HistoryBar {
    pub start: DateTime<FixedOffset>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Async push source of tick events.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn connect(&self) -> std::result::Result<(), FeedError>;

    /// Subscribe to the given instruments. Called once at startup and
    /// replayed deterministically (same ordered list) after a reconnect.
    async fn subscribe(&self, instruments: &[String]) -> std::result::Result<(), FeedError>;

    fn is_connected(&self) -> bool;

    /// Await the next pushed tick.
    async fn next_tick(&self) -> std::result::Result<Tick, FeedError>;

    /// Fetch up to `bars` recent historical bars, oldest first. Fetched
    /// once at startup to seed the aggregator.
    async fn history(
        &self,
        instrument: &str,
        bars: usize,
    ) -> std::result::Result<Vec<HistoryBar>, FeedError>;
}

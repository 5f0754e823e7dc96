//! Simulated market feed for paper runs and integration tests.
//!
//! Seeded random walk per instrument. History is stamped with a
//! configurable venue UTC offset so the aggregator's timezone
//! normalization is exercised on every paper run.

use super::{HistoryBar, MarketFeed};
use crate::domain::Tick;
use crate::error::FeedError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimFeedConfig {
    pub tick_interval_ms: u64,
    pub start_price: f64,
    /// Per-tick move, as a fraction of price.
    pub step_pct: f64,
    pub seed: u64,
    /// Offset the venue's bar timestamps carry, in seconds east of UTC.
    pub venue_utc_offset_secs: i32,
    pub history_interval_secs: i64,
}

impl Default for SimFeedConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            start_price: 100.0,
            step_pct: 0.0008,
            seed: 7,
            venue_utc_offset_secs: 0,
            history_interval_secs: 60,
        }
    }
}

struct WalkState {
    rng: StdRng,
    prices: HashMap<String, f64>,
    subscribed: Vec<String>,
    cursor: usize,
}

pub struct SimFeed {
    cfg: SimFeedConfig,
    connected: AtomicBool,
    state: Mutex<WalkState>,
}

impl SimFeed {
    pub fn new(cfg: SimFeedConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            connected: AtomicBool::new(false),
            state: Mutex::new(WalkState {
                rng,
                prices: HashMap::new(),
                subscribed: Vec::new(),
                cursor: 0,
            }),
        }
    }

    fn to_decimal(value: f64) -> Decimal {
        Decimal::from_f64(value)
            .unwrap_or(Decimal::ONE_HUNDRED)
            .round_dp(4)
    }
}

#[async_trait]
impl MarketFeed for SimFeed {
    async fn connect(&self) -> std::result::Result<(), FeedError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, instruments: &[String]) -> std::result::Result<(), FeedError> {
        if !self.is_connected() {
            return Err(FeedError::Disconnected("subscribe before connect".to_string()));
        }
        let mut state = self.state.lock().expect("sim feed state poisoned");
        state.subscribed = instruments.to_vec();
        for instrument in instruments {
            state
                .prices
                .entry(instrument.clone())
                .or_insert(self.cfg.start_price);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn next_tick(&self) -> std::result::Result<Tick, FeedError> {
        if !self.is_connected() {
            return Err(FeedError::Disconnected("feed not connected".to_string()));
        }
        tokio::time::sleep(Duration::from_millis(self.cfg.tick_interval_ms)).await;

        let mut state = self.state.lock().expect("sim feed state poisoned");
        if state.subscribed.is_empty() {
            return Err(FeedError::Subscription("no instruments subscribed".to_string()));
        }
        let idx = state.cursor % state.subscribed.len();
        state.cursor = state.cursor.wrapping_add(1);
        let instrument = state.subscribed[idx].clone();

        let step = {
            let pct = self.cfg.step_pct;
            state.rng.gen_range(-pct..=pct)
        };
        let price = state
            .prices
            .get(&instrument)
            .copied()
            .unwrap_or(self.cfg.start_price);
        let next = (price * (1.0 + step)).max(0.01);
        state.prices.insert(instrument.clone(), next);
        let size = state.rng.gen_range(1..=10);

        Ok(Tick {
            instrument,
            price: Self::to_decimal(next),
            size: Some(Decimal::from(size)),
            ts: Utc::now(),
        })
    }

    async fn history(
        &self,
        instrument: &str,
        bars: usize,
    ) -> std::result::Result<Vec<HistoryBar>, FeedError> {
        let venue_tz = FixedOffset::east_opt(self.cfg.venue_utc_offset_secs).ok_or_else(|| {
            FeedError::HistoryUnavailable {
                instrument: instrument.to_string(),
                reason: "invalid venue utc offset".to_string(),
            }
        })?;

        // Deterministic per instrument so repeated fetches agree.
        let seed = self.cfg.seed ^ instrument.len() as u64;
        let mut rng = StdRng::seed_from_u64(seed);
        let interval = ChronoDuration::seconds(self.cfg.history_interval_secs);
        let end: DateTime<Utc> = Utc::now();
        let mut price = self.cfg.start_price;
        let mut out = Vec::with_capacity(bars);

        for i in (1..=bars as i64).rev() {
            let start = (end - interval * i as i32).with_timezone(&venue_tz);
            let open = price;
            let drift: f64 = rng.gen_range(-2.0 * self.cfg.step_pct..=2.0 * self.cfg.step_pct);
            let close = (open * (1.0 + drift)).max(0.01);
            let high = open.max(close) * (1.0 + self.cfg.step_pct);
            let low = open.min(close) * (1.0 - self.cfg.step_pct);
            let volume = rng.gen_range(100..=1_000);
            out.push(HistoryBar {
                start,
                open: Self::to_decimal(open),
                high: Self::to_decimal(high),
                low: Self::to_decimal(low),
                close: Self::to_decimal(close),
                volume: Decimal::from(volume),
            });
            price = close;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn next_tick_requires_connect_and_subscribe() {
        let feed = SimFeed::new(SimFeedConfig {
            tick_interval_ms: 1,
            ..SimFeedConfig::default()
        });
        assert!(feed.next_tick().await.is_err());

        feed.connect().await.unwrap();
        assert!(feed.next_tick().await.is_err());

        feed.subscribe(&["ES".to_string()]).await.unwrap();
        let tick = feed.next_tick().await.unwrap();
        assert_eq!(tick.instrument, "ES");
        assert!(tick.price > Decimal::ZERO);
    }

    #[tokio::test]
    async fn history_is_deterministic_and_venue_stamped() {
        let feed = SimFeed::new(SimFeedConfig {
            venue_utc_offset_secs: 3_600,
            ..SimFeedConfig::default()
        });
        let a = feed.history("ES", 5).await.unwrap();
        let b = feed.history("ES", 5).await.unwrap();
        assert_eq!(a.len(), 5);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.open, y.open);
            assert_eq!(x.close, y.close);
        }
        assert_eq!(a[0].start.offset().local_minus_utc(), 3_600);
    }
}

//! Tick-to-bar aggregation.
//!
//! Folds the live tick stream into fixed-interval OHLCV bars per
//! instrument and merges in historical bars fetched once at startup.
//! `ingest` is called from the feed pump and must never block it; all hot
//! state lives in sharded maps keyed by instrument.
//!
//! Memory under tick bursts is capped by a bounded ring buffer per
//! instrument: once full, the oldest ticks are silently dropped. That is
//! the documented data-loss policy, not an error — completed bars already
//! folded into the sequence are unaffected.

use crate::domain::{Bar, Tick};
use crate::feed::HistoryBar;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CandleConfig {
    /// Bar interval in seconds.
    pub interval_secs: i64,
    /// Per-instrument tick ring buffer capacity.
    pub ring_capacity: usize,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            ring_capacity: 5_000,
        }
    }
}

/// Aggregates ticks into an ordered, append-mostly bar sequence per
/// instrument. Bars are keyed by interval start; duplicate interval-starts
/// are merged exactly once with most-recent write winning.
pub struct CandleAggregator {
    cfg: CandleConfig,
    ticks: DashMap<String, VecDeque<Tick>>,
    bars: DashMap<String, BTreeMap<DateTime<Utc>, Bar>>,
    last: DashMap<String, (Decimal, DateTime<Utc>)>,
}

impl CandleAggregator {
    pub fn new(cfg: CandleConfig) -> Self {
        Self {
            cfg,
            ticks: DashMap::new(),
            bars: DashMap::new(),
            last: DashMap::new(),
        }
    }

    /// Buffer a live tick. Non-blocking and thread-safe; oldest ticks are
    /// dropped once the ring is full.
    pub fn ingest(&self, tick: Tick) {
        let mut buffer = self
            .ticks
            .entry(tick.instrument.clone())
            .or_insert_with(VecDeque::new);
        if buffer.len() >= self.cfg.ring_capacity {
            buffer.pop_front();
        }

        let mut entry = self
            .last
            .entry(tick.instrument.clone())
            .or_insert((tick.price, tick.ts));
        if tick.ts >= entry.1 {
            *entry = (tick.price, tick.ts);
        }
        drop(entry);

        buffer.push_back(tick);
    }

    /// Last traded price for an instrument, if any tick has been seen.
    pub fn last_price(&self, instrument: &str) -> Option<Decimal> {
        self.last.get(instrument).map(|e| e.0)
    }

    /// Timestamp of the most recent tick for an instrument.
    pub fn last_tick_at(&self, instrument: &str) -> Option<DateTime<Utc>> {
        self.last.get(instrument).map(|e| e.1)
    }

    /// Recompute bars for one instrument from its buffered ticks and merge
    /// them into the sequence (live data wins on duplicate interval-start).
    pub fn rebuild(&self, instrument: &str) {
        let buffered: Vec<Tick> = match self.ticks.get(instrument) {
            Some(buffer) => buffer.iter().cloned().collect(),
            None => return,
        };
        if buffered.is_empty() {
            return;
        }

        let mut built: BTreeMap<DateTime<Utc>, Bar> = BTreeMap::new();
        for tick in buffered {
            let start = bucket_start(self.cfg.interval_secs, tick.ts);
            let volume = tick.size.unwrap_or(Decimal::ZERO);
            built
                .entry(start)
                .and_modify(|bar| {
                    bar.high = bar.high.max(tick.price);
                    bar.low = bar.low.min(tick.price);
                    bar.close = tick.price;
                    bar.volume += volume;
                })
                .or_insert_with(|| Bar {
                    instrument: instrument.to_string(),
                    start,
                    open: tick.price,
                    high: tick.price,
                    low: tick.price,
                    close: tick.price,
                    volume,
                });
        }

        let mut sequence = self.bars.entry(instrument.to_string()).or_default();
        for (start, bar) in built {
            sequence.insert(start, bar);
        }
    }

    /// Rebuild every instrument that has buffered ticks.
    pub fn rebuild_all(&self) {
        let instruments: Vec<String> = self.ticks.iter().map(|e| e.key().clone()).collect();
        for instrument in instruments {
            self.rebuild(&instrument);
        }
    }

    /// Merge historical bars into the sequence. Venue-local timestamps are
    /// normalized to UTC and truncated to interval boundaries before the
    /// merge, so historical and live bars share one reference clock.
    /// Re-merging the same bar is a no-op beyond the first write.
    pub fn merge_history(&self, instrument: &str, history: Vec<HistoryBar>) {
        if history.is_empty() {
            return;
        }
        let count = history.len();
        let mut sequence = self.bars.entry(instrument.to_string()).or_default();
        for hist in history {
            let start = bucket_start(self.cfg.interval_secs, hist.start.with_timezone(&Utc));
            sequence.insert(
                start,
                Bar {
                    instrument: instrument.to_string(),
                    start,
                    open: hist.open,
                    high: hist.high,
                    low: hist.low,
                    close: hist.close,
                    volume: hist.volume,
                },
            );
        }
        debug!("merged {} historical bars for {}", count, instrument);
    }

    /// Ordered defensive copy of the bar sequence for an instrument.
    pub fn snapshot(&self, instrument: &str) -> Vec<Bar> {
        self.bars
            .get(instrument)
            .map(|seq| seq.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of bars currently held for an instrument.
    pub fn bar_count(&self, instrument: &str) -> usize {
        self.bars.get(instrument).map(|seq| seq.len()).unwrap_or(0)
    }
}

fn bucket_start(interval_secs: i64, ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let start = secs - secs.rem_euclid(interval_secs);
    DateTime::<Utc>::from_timestamp(start, 0).unwrap_or(ts)
}

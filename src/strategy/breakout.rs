//! Breakout generator for trending regimes.
//!
//! Signals when the latest close clears the prior lookback extreme. The
//! entry is not ordered immediately: breakout signals await a retest of
//! the broken level, so the queue gets a higher-quality fill.

use super::traits::{EntryStyle, SignalGenerator};
use crate::domain::{Bar, Direction, Signal};
use crate::error::Result;
use crate::indicators::IndicatorLibrary;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct BreakoutConfig {
    /// Bars defining the range whose extreme must break.
    pub lookback: usize,
    /// Bars scanned for the protective swing stop.
    pub stop_lookback: usize,
    /// Target distance as a multiple of entry-to-stop risk.
    pub target_rr: Decimal,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            stop_lookback: 10,
            target_rr: Decimal::TWO,
        }
    }
}

pub struct Breakout {
    cfg: BreakoutConfig,
}

impl Breakout {
    pub fn new(cfg: BreakoutConfig) -> Self {
        Self { cfg }
    }
}

impl SignalGenerator for Breakout {
    fn id(&self) -> &'static str {
        "breakout"
    }

    fn entry_style(&self) -> EntryStyle {
        EntryStyle::AwaitRetest
    }

    fn generate(
        &self,
        bars: &[Bar],
        _indicators: &dyn IndicatorLibrary,
    ) -> Result<Option<Signal>> {
        if bars.len() < self.cfg.lookback + 1 {
            return Ok(None);
        }
        let last = &bars[bars.len() - 1];
        // The range being broken excludes the bar doing the breaking.
        let range = &bars[bars.len() - 1 - self.cfg.lookback..bars.len() - 1];
        let range_high = match range.iter().map(|b| b.high).max() {
            Some(h) => h,
            None => return Ok(None),
        };
        let range_low = match range.iter().map(|b| b.low).min() {
            Some(l) => l,
            None => return Ok(None),
        };

        let stop_window = &bars[bars.len().saturating_sub(self.cfg.stop_lookback)..];

        if last.close > range_high {
            let stop = match stop_window.iter().map(|b| b.low).min() {
                Some(s) if s < last.close => s,
                _ => return Ok(None),
            };
            let risk = last.close - stop;
            return Ok(Some(Signal {
                instrument: last.instrument.clone(),
                direction: Direction::Long,
                entry_price: last.close,
                stop_loss: stop,
                target: last.close + self.cfg.target_rr * risk,
                strategy_id: self.id().to_string(),
                confidence: breakout_confidence(last.close - range_high, range_high),
                rationale: format!(
                    "close {} cleared {}-bar high {}",
                    last.close, self.cfg.lookback, range_high
                ),
            }));
        }

        if last.close < range_low {
            let stop = match stop_window.iter().map(|b| b.high).max() {
                Some(s) if s > last.close => s,
                _ => return Ok(None),
            };
            let risk = stop - last.close;
            return Ok(Some(Signal {
                instrument: last.instrument.clone(),
                direction: Direction::Short,
                entry_price: last.close,
                stop_loss: stop,
                target: last.close - self.cfg.target_rr * risk,
                strategy_id: self.id().to_string(),
                confidence: breakout_confidence(range_low - last.close, range_low),
                rationale: format!(
                    "close {} broke {}-bar low {}",
                    last.close, self.cfg.lookback, range_low
                ),
            }));
        }

        Ok(None)
    }
}

/// Wider clearance of the level reads as a stronger break.
fn breakout_confidence(margin: Decimal, level: Decimal) -> u8 {
    if level.is_zero() {
        return 55;
    }
    let margin_bps = (margin / level * Decimal::from(10_000)).abs();
    let bump = margin_bps.min(Decimal::from(30));
    let score = Decimal::from(55) + bump;
    score.to_u8().unwrap_or(55)
}

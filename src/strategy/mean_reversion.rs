//! Mean-reversion generator for range-bound regimes.
//!
//! Fades stretched closes back toward the reference average: a close more
//! than `band_mult` standard deviations from the mean signals an entry
//! targeting the mean, with an ATR-based protective stop.

use super::traits::{EntryStyle, SignalGenerator};
use crate::domain::{Bar, Direction, Signal};
use crate::error::Result;
use crate::indicators::{IndicatorKind, IndicatorLibrary, IndicatorRequest};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct MeanReversionConfig {
    pub period: usize,
    /// Entry trigger, in standard deviations from the mean.
    pub band_mult: f64,
    pub atr_period: usize,
    /// Stop distance, in ATR multiples.
    pub stop_atr_mult: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            period: 20,
            band_mult: 2.0,
            atr_period: 14,
            stop_atr_mult: 1.5,
        }
    }
}

pub struct MeanReversion {
    cfg: MeanReversionConfig,
}

impl MeanReversion {
    pub fn new(cfg: MeanReversionConfig) -> Self {
        Self { cfg }
    }
}

impl SignalGenerator for MeanReversion {
    fn id(&self) -> &'static str {
        "mean_reversion"
    }

    fn entry_style(&self) -> EntryStyle {
        EntryStyle::Immediate
    }

    fn generate(
        &self,
        bars: &[Bar],
        indicators: &dyn IndicatorLibrary,
    ) -> Result<Option<Signal>> {
        let needed = self.cfg.period.max(self.cfg.atr_period) + 1;
        if bars.len() < needed {
            return Ok(None);
        }
        let last = match bars.last() {
            Some(b) => b,
            None => return Ok(None),
        };
        let close = match last.close.to_f64() {
            Some(c) if c.is_finite() => c,
            _ => return Ok(None),
        };

        let sma = indicators.compute(
            bars,
            &IndicatorRequest::new(IndicatorKind::Sma, self.cfg.period),
        )?;
        let atr = indicators.compute(
            bars,
            &IndicatorRequest::new(IndicatorKind::Atr, self.cfg.atr_period),
        )?;
        let (mean, atr_now) = match (sma.last(), atr.last()) {
            (Some(&m), Some(&a)) if m.is_finite() && a.is_finite() && a > 0.0 => (m, a),
            _ => return Ok(None),
        };

        // Standard deviation over the same window as the mean.
        let window: Vec<f64> = bars[bars.len() - self.cfg.period..]
            .iter()
            .filter_map(|b| b.close.to_f64())
            .collect();
        if window.len() < self.cfg.period {
            return Ok(None);
        }
        let var =
            window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.cfg.period as f64;
        let sd = var.sqrt();
        if sd <= 0.0 {
            return Ok(None);
        }
        let zscore = (close - mean) / sd;
        if zscore.abs() < self.cfg.band_mult {
            return Ok(None);
        }

        let direction = if zscore < 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };
        let stop_distance = self.cfg.stop_atr_mult * atr_now;
        let (stop, target) = match direction {
            Direction::Long => (close - stop_distance, mean),
            Direction::Short => (close + stop_distance, mean),
        };
        // The mean must still be worth reaching.
        if (target - close).abs() <= f64::EPSILON {
            return Ok(None);
        }

        let confidence = (50.0 + (zscore.abs() - self.cfg.band_mult) * 15.0).clamp(50.0, 95.0);
        let signal = Signal {
            instrument: last.instrument.clone(),
            direction,
            entry_price: to_decimal(close)?,
            stop_loss: to_decimal(stop)?,
            target: to_decimal(target)?,
            strategy_id: self.id().to_string(),
            confidence: confidence as u8,
            rationale: format!(
                "close {:.4} is {:.2} std from {}-bar mean {:.4}",
                close, zscore, self.cfg.period, mean
            ),
        };
        Ok(Some(signal))
    }
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(6))
        .ok_or_else(|| crate::error::EngineError::Indicator(format!("non-finite price {}", value)))
}

//! Indicator library boundary.
//!
//! Pure, stateless functions over bar arrays. The engine consumes the
//! trait only; `StdIndicators` is the built-in implementation. Outputs are
//! aligned one value per input bar, with warmup slots as NaN — a
//! non-finite value at the point of use is a data condition that skips the
//! instrument for the cycle, never a crash.

use crate::domain::Bar;
use crate::error::{EngineError, Result};
use rust_decimal::prelude::ToPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Atr,
    /// Kaufman efficiency ratio scaled to 0-100; the regime classifier.
    TrendStrength,
    /// Bollinger band width as a percentage of the middle band.
    BollingerWidth,
}

#[derive(Debug, Clone)]
pub struct IndicatorRequest {
    pub kind: IndicatorKind,
    pub period: usize,
}

impl IndicatorRequest {
    pub fn new(kind: IndicatorKind, period: usize) -> Self {
        Self { kind, period }
    }
}

pub trait IndicatorLibrary: Send + Sync {
    fn compute(&self, bars: &[Bar], request: &IndicatorRequest) -> Result<Vec<f64>>;
}

/// Built-in indicator implementations.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdIndicators;

impl IndicatorLibrary for StdIndicators {
    fn compute(&self, bars: &[Bar], request: &IndicatorRequest) -> Result<Vec<f64>> {
        if request.period == 0 {
            return Err(EngineError::Indicator("period must be positive".to_string()));
        }
        let out = match request.kind {
            IndicatorKind::Sma => sma(&closes(bars), request.period),
            IndicatorKind::Ema => ema(&closes(bars), request.period),
            IndicatorKind::Atr => atr(bars, request.period),
            IndicatorKind::TrendStrength => trend_strength(&closes(bars), request.period),
            IndicatorKind::BollingerWidth => bollinger_width(&closes(bars), request.period),
        };
        Ok(out)
    }
}

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .map(|b| b.close.to_f64().unwrap_or(f64::NAN))
        .collect()
}

fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    out
}

fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if values.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;
    for i in period..values.len() {
        out[i] = values[i] * k + out[i - 1] * (1.0 - k);
    }
    out
}

fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut ranges = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let hl = (bar.high - bar.low).to_f64().unwrap_or(f64::NAN);
        let tr = if i == 0 {
            hl
        } else {
            let prev_close = bars[i - 1].close.to_f64().unwrap_or(f64::NAN);
            let high = bar.high.to_f64().unwrap_or(f64::NAN);
            let low = bar.low.to_f64().unwrap_or(f64::NAN);
            hl.max((high - prev_close).abs()).max((low - prev_close).abs())
        };
        ranges.push(tr);
    }
    sma(&ranges, period)
}

fn trend_strength(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in period..values.len() {
        let net = (values[i] - values[i - period]).abs();
        let mut churn = 0.0;
        for j in (i - period + 1)..=i {
            churn += (values[j] - values[j - 1]).abs();
        }
        out[i] = if churn > 0.0 { net / churn * 100.0 } else { 0.0 };
    }
    out
}

fn bollinger_width(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if values.len() < period {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        let sd = var.sqrt();
        out[i] = if mean != 0.0 { 4.0 * sd / mean * 100.0 } else { f64::NAN };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn bar(close: Decimal, high: Decimal, low: Decimal, secs: i64) -> Bar {
        Bar {
            instrument: "T".to_string(),
            start: DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume: dec!(1),
        }
    }

    fn close_bars(closes: &[i64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(Decimal::from(c), Decimal::from(c), Decimal::from(c), i as i64 * 60))
            .collect()
    }

    #[test]
    fn sma_known_values() {
        let bars = close_bars(&[1, 2, 3, 4, 5]);
        let out = StdIndicators
            .compute(&bars, &IndicatorRequest::new(IndicatorKind::Sma, 3))
            .unwrap();
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(out[2], 2.0);
        assert_eq!(out[3], 3.0);
        assert_eq!(out[4], 4.0);
    }

    #[test]
    fn trend_strength_of_a_ramp_is_full() {
        let bars = close_bars(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let out = StdIndicators
            .compute(&bars, &IndicatorRequest::new(IndicatorKind::TrendStrength, 5))
            .unwrap();
        assert_eq!(out[7], 100.0);
    }

    #[test]
    fn trend_strength_of_a_zigzag_is_low() {
        let bars = close_bars(&[10, 11, 10, 11, 10, 11, 10, 11, 10]);
        let out = StdIndicators
            .compute(&bars, &IndicatorRequest::new(IndicatorKind::TrendStrength, 6))
            .unwrap();
        let last = out[8];
        assert!(last.is_finite());
        assert!(last < 30.0, "zigzag should read as range-bound, got {}", last);
    }

    #[test]
    fn atr_of_constant_range_bars() {
        let bars: Vec<Bar> = (0..6)
            .map(|i| bar(dec!(100), dec!(101), dec!(99), i * 60))
            .collect();
        let out = StdIndicators
            .compute(&bars, &IndicatorRequest::new(IndicatorKind::Atr, 3))
            .unwrap();
        assert_eq!(out[5], 2.0);
    }

    #[test]
    fn zero_period_is_rejected() {
        let bars = close_bars(&[1, 2]);
        assert!(StdIndicators
            .compute(&bars, &IndicatorRequest::new(IndicatorKind::Sma, 0))
            .is_err());
    }

    #[test]
    fn short_history_yields_warmup_nans() {
        let bars = close_bars(&[1, 2]);
        let out = StdIndicators
            .compute(&bars, &IndicatorRequest::new(IndicatorKind::Ema, 5))
            .unwrap();
        assert!(out.iter().all(|v| v.is_nan()));
    }
}

//! Regime-aware strategy dispatch.
//!
//! Per instrument, a trend-strength reading decides which single generator
//! runs this cycle: below the threshold the market is range-bound and the
//! mean-reversion generator fires; at or above it the breakout generator
//! does. The generators are mutually exclusive, never layered.

use super::traits::{EntryStyle, SignalGenerator};
use crate::domain::{Bar, Signal};
use crate::error::{EngineError, Result};
use crate::indicators::{IndicatorKind, IndicatorLibrary, IndicatorRequest};
use chrono::{DateTime, NaiveTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// A daily no-trade window, e.g. a low-liquidity midday band. May wrap
/// midnight (start > end).
#[derive(Debug, Clone)]
pub struct BlackoutWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl BlackoutWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub regime_period: usize,
    /// Trend strength (0-100) at or above which the market counts as
    /// trending.
    pub regime_threshold: f64,
    pub min_history: usize,
    pub blackout: Vec<BlackoutWindow>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            regime_period: 10,
            regime_threshold: 40.0,
            min_history: 30,
            blackout: Vec::new(),
        }
    }
}

/// A signal plus the entry path its generator wants.
#[derive(Debug, Clone)]
pub struct RoutedSignal {
    pub signal: Signal,
    pub entry_style: EntryStyle,
}

pub struct StrategyRouter {
    cfg: RouterConfig,
    indicators: Arc<dyn IndicatorLibrary>,
    trend: Box<dyn SignalGenerator>,
    mean_reversion: Box<dyn SignalGenerator>,
}

impl StrategyRouter {
    pub fn new(
        cfg: RouterConfig,
        indicators: Arc<dyn IndicatorLibrary>,
        trend: Box<dyn SignalGenerator>,
        mean_reversion: Box<dyn SignalGenerator>,
    ) -> Self {
        Self {
            cfg,
            indicators,
            trend,
            mean_reversion,
        }
    }

    /// Default generator pair.
    pub fn standard(cfg: RouterConfig, indicators: Arc<dyn IndicatorLibrary>) -> Self {
        Self::new(
            cfg,
            indicators,
            Box::new(super::breakout::Breakout::new(Default::default())),
            Box::new(super::mean_reversion::MeanReversion::new(Default::default())),
        )
    }

    /// Checked before any per-instrument work each cycle, so blacked-out
    /// windows cost no generator computation.
    pub fn in_blackout(&self, now: DateTime<Utc>) -> bool {
        let t = now.time();
        self.cfg.blackout.iter().any(|w| w.contains(t))
    }

    pub fn min_history(&self) -> usize {
        self.cfg.min_history
    }

    /// Current regime reading for an instrument.
    pub fn regime(&self, bars: &[Bar]) -> Result<f64> {
        let strength = self.indicators.compute(
            bars,
            &IndicatorRequest::new(IndicatorKind::TrendStrength, self.cfg.regime_period),
        )?;
        match strength.last() {
            Some(v) if v.is_finite() => Ok(*v),
            _ => Err(EngineError::Indicator("trend strength unavailable".to_string())),
        }
    }

    /// Run exactly one generator for the instrument, chosen by regime.
    pub fn evaluate(&self, bars: &[Bar]) -> Result<Option<RoutedSignal>> {
        if bars.len() < self.cfg.min_history {
            let instrument = bars
                .first()
                .map(|b| b.instrument.clone())
                .unwrap_or_else(|| "?".to_string());
            return Err(EngineError::InsufficientHistory {
                instrument,
                have: bars.len(),
                need: self.cfg.min_history,
            });
        }

        let regime = self.regime(bars)?;
        let generator = if regime >= self.cfg.regime_threshold {
            &self.trend
        } else {
            &self.mean_reversion
        };
        debug!(
            "regime {:.1} for {} -> {}",
            regime,
            bars.last().map(|b| b.instrument.as_str()).unwrap_or("?"),
            generator.id()
        );

        let signal = generator.generate(bars, self.indicators.as_ref())?;
        Ok(signal.map(|signal| RoutedSignal {
            signal,
            entry_style: generator.entry_style(),
        }))
    }
}

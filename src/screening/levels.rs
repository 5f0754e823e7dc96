//! Concrete screening levels.
//!
//! The standard ordering puts the critical gates first (blacklist,
//! portfolio risk), then the advisory quality filters. Every threshold is
//! configurable; defaults are deliberately permissive enough for paper
//! runs.

use super::{LevelOutcome, ScreenLevel, ScreeningContext};
use crate::domain::{Direction, Signal};
use crate::error::{EngineError, Result};
use crate::indicators::{IndicatorKind, IndicatorLibrary, IndicatorRequest};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;

/// Tunable thresholds for the standard level set.
#[derive(Debug, Clone)]
pub struct ScreeningSettings {
    pub blacklist: HashSet<String>,
    pub max_open_positions: usize,
    /// Cap on aggregate entry-to-stop risk across open positions plus the
    /// candidate.
    pub max_total_risk: Decimal,
    pub min_risk_reward: Decimal,
    pub min_confidence: u8,
    pub trend_period: usize,
    pub max_band_width_pct: f64,
    pub max_gap_pct: Decimal,
    pub compression_period: usize,
    pub max_range_expansion: f64,
    pub confluence_lookback: usize,
    pub min_headroom_pct: Decimal,
    pub min_breadth_long: f64,
    pub max_breadth_short: f64,
    pub min_heuristic_score: f64,
    pub max_entry_extension_pct: Decimal,
}

impl Default for ScreeningSettings {
    fn default() -> Self {
        Self {
            blacklist: HashSet::new(),
            max_open_positions: 5,
            max_total_risk: dec!(5000),
            min_risk_reward: dec!(1.5),
            min_confidence: 40,
            trend_period: 20,
            max_band_width_pct: 6.0,
            max_gap_pct: dec!(0.01),
            compression_period: 20,
            max_range_expansion: 2.5,
            confluence_lookback: 50,
            min_headroom_pct: dec!(0.005),
            min_breadth_long: 0.35,
            max_breadth_short: 0.65,
            min_heuristic_score: 45.0,
            max_entry_extension_pct: dec!(0.005),
        }
    }
}

/// The standard ordered level set.
pub fn standard_levels(
    settings: &ScreeningSettings,
    indicators: Arc<dyn IndicatorLibrary>,
) -> Vec<Box<dyn ScreenLevel>> {
    vec![
        Box::new(SymbolBlacklist {
            blacklist: settings.blacklist.clone(),
        }),
        Box::new(PortfolioRiskLimit {
            max_open_positions: settings.max_open_positions,
            max_total_risk: settings.max_total_risk,
        }),
        Box::new(RiskReward {
            min_risk_reward: settings.min_risk_reward,
        }),
        Box::new(ConfidenceFloor {
            min_confidence: settings.min_confidence,
        }),
        Box::new(TrendAlignment {
            indicators: indicators.clone(),
            period: settings.trend_period,
        }),
        Box::new(VolatilityBand {
            indicators: indicators.clone(),
            period: settings.trend_period,
            max_width_pct: settings.max_band_width_pct,
        }),
        Box::new(GapAnalysis {
            max_gap_pct: settings.max_gap_pct,
        }),
        Box::new(RangeCompression {
            period: settings.compression_period,
            max_expansion: settings.max_range_expansion,
        }),
        Box::new(SupportResistanceConfluence {
            lookback: settings.confluence_lookback,
            min_headroom_pct: settings.min_headroom_pct,
        }),
        Box::new(MarketBreadth {
            min_breadth_long: settings.min_breadth_long,
            max_breadth_short: settings.max_breadth_short,
        }),
        Box::new(HeuristicScore {
            indicators,
            period: settings.trend_period,
            min_score: settings.min_heuristic_score,
        }),
        Box::new(EntryTiming {
            max_extension_pct: settings.max_entry_extension_pct,
        }),
    ]
}

fn last_finite(values: &[f64], what: &str) -> Result<f64> {
    match values.last() {
        Some(v) if v.is_finite() => Ok(*v),
        _ => Err(EngineError::Indicator(format!("{} unavailable", what))),
    }
}

/// Hard ban list. Critical: a blacklisted symbol never trades.
pub struct SymbolBlacklist {
    pub blacklist: HashSet<String>,
}

impl ScreenLevel for SymbolBlacklist {
    fn name(&self) -> &'static str {
        "symbol_blacklist"
    }
    fn critical(&self) -> bool {
        true
    }
    fn evaluate(&self, signal: &Signal, _ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        if self.blacklist.contains(&signal.instrument) {
            Ok(LevelOutcome::Fail(format!(
                "{} is blacklisted",
                signal.instrument
            )))
        } else {
            Ok(LevelOutcome::Pass)
        }
    }
}

/// Portfolio-wide exposure cap. Critical.
pub struct PortfolioRiskLimit {
    pub max_open_positions: usize,
    pub max_total_risk: Decimal,
}

impl ScreenLevel for PortfolioRiskLimit {
    fn name(&self) -> &'static str {
        "portfolio_risk"
    }
    fn critical(&self) -> bool {
        true
    }
    fn evaluate(&self, signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        if ctx.open_positions.len() >= self.max_open_positions {
            return Ok(LevelOutcome::Fail(format!(
                "{} positions already open, limit is {}",
                ctx.open_positions.len(),
                self.max_open_positions
            )));
        }
        let open_risk: Decimal = ctx
            .open_positions
            .iter()
            .map(|p| p.risk_per_unit() * p.quantity)
            .sum();
        let proposed = signal.risk_per_unit() * ctx.proposed_quantity;
        let total = open_risk + proposed;
        if total > self.max_total_risk {
            return Ok(LevelOutcome::Fail(format!(
                "aggregate risk {} would exceed limit {}",
                total, self.max_total_risk
            )));
        }
        Ok(LevelOutcome::Pass)
    }
}

/// Reward-to-risk floor. Advisory.
pub struct RiskReward {
    pub min_risk_reward: Decimal,
}

impl ScreenLevel for RiskReward {
    fn name(&self) -> &'static str {
        "risk_reward"
    }
    fn evaluate(&self, signal: &Signal, _ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        let risk = signal.risk_per_unit();
        if risk.is_zero() {
            return Ok(LevelOutcome::Fail("stop equals entry".to_string()));
        }
        let rr = signal.reward_per_unit() / risk;
        if rr < self.min_risk_reward {
            Ok(LevelOutcome::Fail(format!(
                "reward/risk {:.2} below floor {}",
                rr, self.min_risk_reward
            )))
        } else {
            Ok(LevelOutcome::Pass)
        }
    }
}

/// Generator confidence floor. Advisory.
pub struct ConfidenceFloor {
    pub min_confidence: u8,
}

impl ScreenLevel for ConfidenceFloor {
    fn name(&self) -> &'static str {
        "confidence_floor"
    }
    fn evaluate(&self, signal: &Signal, _ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        if signal.confidence < self.min_confidence {
            Ok(LevelOutcome::Fail(format!(
                "confidence {} below floor {}",
                signal.confidence, self.min_confidence
            )))
        } else {
            Ok(LevelOutcome::Pass)
        }
    }
}

/// Entries must not fight the reference average. Advisory.
pub struct TrendAlignment {
    pub indicators: Arc<dyn IndicatorLibrary>,
    pub period: usize,
}

impl ScreenLevel for TrendAlignment {
    fn name(&self) -> &'static str {
        "trend_alignment"
    }
    fn evaluate(&self, signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        let sma = self
            .indicators
            .compute(ctx.bars, &IndicatorRequest::new(IndicatorKind::Sma, self.period))?;
        let avg = last_finite(&sma, "trend average")?;
        let close = ctx
            .bars
            .last()
            .map(|b| b.close.to_f64().unwrap_or(f64::NAN))
            .ok_or_else(|| EngineError::Indicator("no bars".to_string()))?;
        if !close.is_finite() {
            return Err(EngineError::Indicator("non-finite close".to_string()));
        }
        let aligned = match signal.direction {
            Direction::Long => close >= avg,
            Direction::Short => close <= avg,
        };
        if aligned {
            Ok(LevelOutcome::Pass)
        } else {
            Ok(LevelOutcome::Fail(format!(
                "close {:.4} against {}-bar average {:.4} for a {} entry",
                close, self.period, avg, signal.direction
            )))
        }
    }
}

/// Rejects entries when volatility has blown out. Advisory.
pub struct VolatilityBand {
    pub indicators: Arc<dyn IndicatorLibrary>,
    pub period: usize,
    pub max_width_pct: f64,
}

impl ScreenLevel for VolatilityBand {
    fn name(&self) -> &'static str {
        "volatility_band"
    }
    fn evaluate(&self, _signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        let widths = self.indicators.compute(
            ctx.bars,
            &IndicatorRequest::new(IndicatorKind::BollingerWidth, self.period),
        )?;
        let width = last_finite(&widths, "band width")?;
        if width > self.max_width_pct {
            Ok(LevelOutcome::Fail(format!(
                "band width {:.2}% above cap {:.2}%",
                width, self.max_width_pct
            )))
        } else {
            Ok(LevelOutcome::Pass)
        }
    }
}

/// Rejects entries straight into an unfilled gap. Advisory.
pub struct GapAnalysis {
    pub max_gap_pct: Decimal,
}

impl ScreenLevel for GapAnalysis {
    fn name(&self) -> &'static str {
        "gap_analysis"
    }
    fn evaluate(&self, _signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        if ctx.bars.len() < 2 {
            return Err(EngineError::Indicator(
                "need at least two bars for gap analysis".to_string(),
            ));
        }
        let last = &ctx.bars[ctx.bars.len() - 1];
        let prev = &ctx.bars[ctx.bars.len() - 2];
        if prev.close.is_zero() {
            return Err(EngineError::Indicator("zero previous close".to_string()));
        }
        let gap = ((last.open - prev.close) / prev.close).abs();
        if gap > self.max_gap_pct {
            Ok(LevelOutcome::Fail(format!(
                "open gapped {:.3}% from prior close, cap {:.3}%",
                gap * dec!(100),
                self.max_gap_pct * dec!(100)
            )))
        } else {
            Ok(LevelOutcome::Pass)
        }
    }
}

/// Recent ranges must not have exploded relative to the prior window.
/// Advisory.
pub struct RangeCompression {
    pub period: usize,
    pub max_expansion: f64,
}

impl ScreenLevel for RangeCompression {
    fn name(&self) -> &'static str {
        "range_compression"
    }
    fn evaluate(&self, _signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        let needed = self.period * 2;
        if ctx.bars.len() < needed {
            return Err(EngineError::Indicator(format!(
                "need {} bars for range comparison",
                needed
            )));
        }
        let ranges: Vec<f64> = ctx.bars[ctx.bars.len() - needed..]
            .iter()
            .map(|b| b.range().to_f64().unwrap_or(f64::NAN))
            .collect();
        let prior: f64 = ranges[..self.period].iter().sum::<f64>() / self.period as f64;
        let recent: f64 = ranges[self.period..].iter().sum::<f64>() / self.period as f64;
        if !prior.is_finite() || !recent.is_finite() || prior == 0.0 {
            return Err(EngineError::Indicator("degenerate bar ranges".to_string()));
        }
        let expansion = recent / prior;
        if expansion > self.max_expansion {
            Ok(LevelOutcome::Fail(format!(
                "average range expanded {:.2}x, cap {:.2}x",
                expansion, self.max_expansion
            )))
        } else {
            Ok(LevelOutcome::Pass)
        }
    }
}

/// Entries need headroom to the nearest swing extreme, unless the entry
/// clears it outright. Advisory.
pub struct SupportResistanceConfluence {
    pub lookback: usize,
    pub min_headroom_pct: Decimal,
}

impl ScreenLevel for SupportResistanceConfluence {
    fn name(&self) -> &'static str {
        "sr_confluence"
    }
    fn evaluate(&self, signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        if ctx.bars.len() < 2 {
            return Err(EngineError::Indicator(
                "need history for support/resistance".to_string(),
            ));
        }
        // Exclude the live bar; the signal may be part of it.
        let window_start = ctx.bars.len().saturating_sub(self.lookback + 1);
        let window = &ctx.bars[window_start..ctx.bars.len() - 1];
        if window.is_empty() || signal.entry_price.is_zero() {
            return Err(EngineError::Indicator("empty lookback window".to_string()));
        }
        match signal.direction {
            Direction::Long => {
                let resistance = window.iter().map(|b| b.high).max().unwrap_or(signal.entry_price);
                if signal.entry_price > resistance {
                    return Ok(LevelOutcome::Pass);
                }
                let headroom = (resistance - signal.entry_price) / signal.entry_price;
                if headroom < self.min_headroom_pct {
                    return Ok(LevelOutcome::Fail(format!(
                        "entry {} sits under resistance {}",
                        signal.entry_price, resistance
                    )));
                }
            }
            Direction::Short => {
                let support = window.iter().map(|b| b.low).min().unwrap_or(signal.entry_price);
                if signal.entry_price < support {
                    return Ok(LevelOutcome::Pass);
                }
                let headroom = (signal.entry_price - support) / signal.entry_price;
                if headroom < self.min_headroom_pct {
                    return Ok(LevelOutcome::Fail(format!(
                        "entry {} sits over support {}",
                        signal.entry_price, support
                    )));
                }
            }
        }
        Ok(LevelOutcome::Pass)
    }
}

/// Cross-instrument participation filter. Advisory.
pub struct MarketBreadth {
    pub min_breadth_long: f64,
    pub max_breadth_short: f64,
}

impl ScreenLevel for MarketBreadth {
    fn name(&self) -> &'static str {
        "market_breadth"
    }
    fn evaluate(&self, signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        let breadth = ctx
            .breadth
            .ok_or_else(|| EngineError::Indicator("breadth unavailable".to_string()))?;
        let ok = match signal.direction {
            Direction::Long => breadth >= self.min_breadth_long,
            Direction::Short => breadth <= self.max_breadth_short,
        };
        if ok {
            Ok(LevelOutcome::Pass)
        } else {
            Ok(LevelOutcome::Fail(format!(
                "breadth {:.2} hostile to a {} entry",
                breadth, signal.direction
            )))
        }
    }
}

/// Composite quality score blending generator confidence with measured
/// trend strength. Advisory.
pub struct HeuristicScore {
    pub indicators: Arc<dyn IndicatorLibrary>,
    pub period: usize,
    pub min_score: f64,
}

impl ScreenLevel for HeuristicScore {
    fn name(&self) -> &'static str {
        "heuristic_score"
    }
    fn evaluate(&self, signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        let strength = self.indicators.compute(
            ctx.bars,
            &IndicatorRequest::new(IndicatorKind::TrendStrength, self.period),
        )?;
        let ts = last_finite(&strength, "trend strength")?;
        let score = 0.5 * signal.confidence as f64 + 0.5 * ts;
        if score < self.min_score {
            Ok(LevelOutcome::Fail(format!(
                "composite score {:.1} below floor {:.1}",
                score, self.min_score
            )))
        } else {
            Ok(LevelOutcome::Pass)
        }
    }
}

/// Price must not have run away from the signalled entry. Advisory.
pub struct EntryTiming {
    pub max_extension_pct: Decimal,
}

impl ScreenLevel for EntryTiming {
    fn name(&self) -> &'static str {
        "entry_timing"
    }
    fn evaluate(&self, signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
        if signal.entry_price.is_zero() {
            return Err(EngineError::Indicator("zero entry price".to_string()));
        }
        let extension = ((ctx.last_price - signal.entry_price) / signal.entry_price).abs();
        if extension > self.max_extension_pct {
            Ok(LevelOutcome::Fail(format!(
                "price {} moved {:.3}% from entry {}, cap {:.3}%",
                ctx.last_price,
                extension * dec!(100),
                signal.entry_price,
                self.max_extension_pct * dec!(100)
            )))
        } else {
            Ok(LevelOutcome::Pass)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, Position};
    use crate::indicators::StdIndicators;
    use chrono::{DateTime, Utc};

    fn bar(close: Decimal, secs: i64) -> Bar {
        Bar {
            instrument: "ES".to_string(),
            start: DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
            open: close,
            high: close + dec!(1),
            low: close - dec!(1),
            close,
            volume: dec!(10),
        }
    }

    fn flat_bars(n: usize, close: Decimal) -> Vec<Bar> {
        (0..n).map(|i| bar(close, i as i64 * 60)).collect()
    }

    fn signal(direction: Direction) -> Signal {
        Signal {
            instrument: "ES".to_string(),
            direction,
            entry_price: dec!(100),
            stop_loss: match direction {
                Direction::Long => dec!(98),
                Direction::Short => dec!(102),
            },
            target: match direction {
                Direction::Long => dec!(106),
                Direction::Short => dec!(94),
            },
            strategy_id: "test".to_string(),
            confidence: 70,
            rationale: "test".to_string(),
        }
    }

    fn ctx<'a>(bars: &'a [Bar], positions: &'a [Position]) -> ScreeningContext<'a> {
        ScreeningContext {
            bars,
            last_price: dec!(100),
            open_positions: positions,
            proposed_quantity: dec!(1),
            breadth: Some(0.5),
            now: Utc::now(),
        }
    }

    fn position(instrument: &str) -> Position {
        Position {
            instrument: instrument.to_string(),
            direction: Direction::Long,
            entry_price: dec!(100),
            quantity: dec!(10),
            stop_loss: dec!(98),
            target: dec!(106),
            breakeven_moved: false,
            peak_favorable_price: dec!(100),
            order_id: "ord".to_string(),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn blacklist_blocks_listed_symbol() {
        let mut blacklist = HashSet::new();
        blacklist.insert("ES".to_string());
        let level = SymbolBlacklist { blacklist };
        let bars = flat_bars(2, dec!(100));
        let outcome = level.evaluate(&signal(Direction::Long), &ctx(&bars, &[])).unwrap();
        assert!(matches!(outcome, LevelOutcome::Fail(_)));
        assert!(level.critical());
    }

    #[test]
    fn portfolio_limit_counts_positions_and_risk() {
        let level = PortfolioRiskLimit {
            max_open_positions: 2,
            max_total_risk: dec!(25),
        };
        let bars = flat_bars(2, dec!(100));

        let crowded = vec![position("A"), position("B")];
        let outcome = level
            .evaluate(&signal(Direction::Long), &ctx(&bars, &crowded))
            .unwrap();
        assert!(matches!(outcome, LevelOutcome::Fail(_)));

        // One open position with 20 risk + candidate 2 risk = 22 <= 25.
        let one = vec![position("A")];
        let outcome = level
            .evaluate(&signal(Direction::Long), &ctx(&bars, &one))
            .unwrap();
        assert_eq!(outcome, LevelOutcome::Pass);

        let tight = PortfolioRiskLimit {
            max_open_positions: 5,
            max_total_risk: dec!(21),
        };
        let outcome = tight
            .evaluate(&signal(Direction::Long), &ctx(&bars, &one))
            .unwrap();
        assert!(matches!(outcome, LevelOutcome::Fail(_)));
    }

    #[test]
    fn risk_reward_floor() {
        let level = RiskReward {
            min_risk_reward: dec!(1.5),
        };
        let bars = flat_bars(2, dec!(100));
        // 6 reward / 2 risk = 3.0 passes.
        assert_eq!(
            level.evaluate(&signal(Direction::Long), &ctx(&bars, &[])).unwrap(),
            LevelOutcome::Pass
        );

        let mut poor = signal(Direction::Long);
        poor.target = dec!(102);
        let outcome = level.evaluate(&poor, &ctx(&bars, &[])).unwrap();
        assert!(matches!(outcome, LevelOutcome::Fail(_)));
    }

    #[test]
    fn trend_alignment_follows_average() {
        let indicators: Arc<dyn IndicatorLibrary> = Arc::new(StdIndicators);
        let level = TrendAlignment {
            indicators,
            period: 3,
        };
        // Rising closes: last close above average, long aligned.
        let rising: Vec<Bar> = [98, 99, 100, 101, 102]
            .iter()
            .enumerate()
            .map(|(i, c)| bar(Decimal::from(*c as i64), i as i64 * 60))
            .collect();
        assert_eq!(
            level.evaluate(&signal(Direction::Long), &ctx(&rising, &[])).unwrap(),
            LevelOutcome::Pass
        );
        let outcome = level.evaluate(&signal(Direction::Short), &ctx(&rising, &[])).unwrap();
        assert!(matches!(outcome, LevelOutcome::Fail(_)));
    }

    #[test]
    fn gap_analysis_errors_without_history() {
        let level = GapAnalysis {
            max_gap_pct: dec!(0.01),
        };
        let bars = flat_bars(1, dec!(100));
        assert!(level.evaluate(&signal(Direction::Long), &ctx(&bars, &[])).is_err());
    }

    #[test]
    fn gap_analysis_flags_wide_gap() {
        let level = GapAnalysis {
            max_gap_pct: dec!(0.01),
        };
        let mut bars = flat_bars(2, dec!(100));
        bars[1].open = dec!(103);
        let outcome = level.evaluate(&signal(Direction::Long), &ctx(&bars, &[])).unwrap();
        assert!(matches!(outcome, LevelOutcome::Fail(_)));
    }

    #[test]
    fn entry_timing_rejects_runaway_price() {
        let level = EntryTiming {
            max_extension_pct: dec!(0.005),
        };
        let bars = flat_bars(2, dec!(100));
        let mut context = ctx(&bars, &[]);
        context.last_price = dec!(101);
        let outcome = level.evaluate(&signal(Direction::Long), &context).unwrap();
        assert!(matches!(outcome, LevelOutcome::Fail(_)));
    }

    #[test]
    fn breadth_errors_when_unavailable() {
        let level = MarketBreadth {
            min_breadth_long: 0.35,
            max_breadth_short: 0.65,
        };
        let bars = flat_bars(2, dec!(100));
        let mut context = ctx(&bars, &[]);
        context.breadth = None;
        assert!(level.evaluate(&signal(Direction::Long), &context).is_err());
    }

    #[test]
    fn standard_set_orders_criticals_first() {
        let settings = ScreeningSettings::default();
        let levels = standard_levels(&settings, Arc::new(StdIndicators));
        assert!(levels.len() >= 12);
        assert!(levels[0].critical());
        assert!(levels[1].critical());
        assert!(!levels[2].critical());
    }
}

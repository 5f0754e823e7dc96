//! Candidate trades and screening outcomes.

use super::market::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A candidate trade produced by a signal generator.
///
/// Immutable once created; the screening pipeline either passes it through
/// to order placement (or the retest queue) or blocks it with a reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub target: Decimal,
    pub strategy_id: String,
    /// 0-100
    pub confidence: u8,
    pub rationale: String,
}

impl Signal {
    /// Entry-to-stop distance per unit, the risk basis for sizing and
    /// for the breakeven rule.
    pub fn risk_per_unit(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Target-to-entry distance per unit.
    pub fn reward_per_unit(&self) -> Decimal {
        (self.target - self.entry_price).abs()
    }
}

/// Outcome of running a signal through the screening pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningVerdict {
    pub passed: bool,
    /// Name of the first level that blocked the signal, if any.
    pub blocking_level: Option<String>,
    pub reason: String,
    /// A critical level's failure blocks regardless of fail-open config.
    pub is_critical: bool,
}

impl ScreeningVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            blocking_level: None,
            reason: "all enabled levels passed".to_string(),
            is_critical: false,
        }
    }

    pub fn blocked(level: &str, reason: impl Into<String>, is_critical: bool) -> Self {
        Self {
            passed: false,
            blocking_level: Some(level.to_string()),
            reason: reason.into(),
            is_critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_signal() -> Signal {
        Signal {
            instrument: "NQ".to_string(),
            direction: Direction::Long,
            entry_price: dec!(100),
            stop_loss: dec!(98),
            target: dec!(106),
            strategy_id: "breakout".to_string(),
            confidence: 70,
            rationale: "range high cleared".to_string(),
        }
    }

    #[test]
    fn risk_and_reward_per_unit() {
        let signal = long_signal();
        assert_eq!(signal.risk_per_unit(), dec!(2));
        assert_eq!(signal.reward_per_unit(), dec!(6));
    }

    #[test]
    fn blocked_verdict_carries_level_and_reason() {
        let verdict = ScreeningVerdict::blocked("portfolio_risk", "too many open positions", true);
        assert!(!verdict.passed);
        assert!(verdict.is_critical);
        assert_eq!(verdict.blocking_level.as_deref(), Some("portfolio_risk"));
    }
}

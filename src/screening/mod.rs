//! Multi-level trade screening.
//!
//! Every candidate signal runs through an ordered list of validators.
//! Levels are independently enable/disable-able by name and classified
//! critical or advisory:
//!
//! - critical levels are evaluated unconditionally and their failure (or
//!   internal error) always blocks, regardless of fail-open configuration;
//! - advisory levels short-circuit after the first failure; an advisory
//!   level's *internal error* is treated as a pass under fail-open
//!   configuration (logged and audited, never silently ignored) and as a
//!   block under fail-closed.
//!
//! Every level outcome is recorded to the audit sink regardless of the
//! overall verdict.

pub mod levels;

use crate::audit::{AuditEvent, AuditSink};
use crate::domain::{Bar, Position, ScreeningVerdict, Signal};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Market state handed to every level.
pub struct ScreeningContext<'a> {
    pub bars: &'a [Bar],
    pub last_price: Decimal,
    pub open_positions: &'a [Position],
    /// Quantity the engine intends to order if the signal passes.
    pub proposed_quantity: Decimal,
    /// Fraction of tracked instruments trading above their reference
    /// average this cycle, when the router could compute it.
    pub breadth: Option<f64>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelOutcome {
    Pass,
    Fail(String),
}

pub trait ScreenLevel: Send + Sync {
    fn name(&self) -> &'static str;

    fn critical(&self) -> bool {
        false
    }

    /// `Err` means the level itself broke (missing data, non-finite
    /// indicator), which is distinct from a considered `Fail`.
    fn evaluate(&self, signal: &Signal, ctx: &ScreeningContext<'_>) -> Result<LevelOutcome>;
}

pub struct ScreeningPipeline {
    levels: Vec<Box<dyn ScreenLevel>>,
    disabled: HashSet<String>,
    fail_open: bool,
    audit: AuditSink,
}

impl ScreeningPipeline {
    pub fn new(
        levels: Vec<Box<dyn ScreenLevel>>,
        fail_open: bool,
        disabled: HashSet<String>,
        audit: AuditSink,
    ) -> Self {
        Self {
            levels,
            disabled,
            fail_open,
            audit,
        }
    }

    /// Names of the enabled levels, in evaluation order.
    pub fn enabled_levels(&self) -> Vec<&'static str> {
        self.levels
            .iter()
            .map(|l| l.name())
            .filter(|n| !self.disabled.contains(*n))
            .collect()
    }

    /// Run the signal through every enabled level and produce the overall
    /// verdict.
    pub fn validate(&self, signal: &Signal, ctx: &ScreeningContext<'_>) -> ScreeningVerdict {
        // (name, reason, critical) of the level that blocks the signal.
        let mut blocking: Option<(&'static str, String, bool)> = None;

        for level in &self.levels {
            if self.disabled.contains(level.name()) {
                continue;
            }
            // After a failure, only critical levels still run.
            if blocking.is_some() && !level.critical() {
                continue;
            }

            let (passed, reason) = match level.evaluate(signal, ctx) {
                Ok(LevelOutcome::Pass) => (true, "ok".to_string()),
                Ok(LevelOutcome::Fail(reason)) => (false, reason),
                Err(e) if level.critical() => (false, format!("internal error: {}", e)),
                Err(e) if self.fail_open => {
                    warn!(
                        "screening level {} errored for {}; fail-open, counting as pass: {}",
                        level.name(),
                        signal.instrument,
                        e
                    );
                    (true, format!("internal error (fail-open): {}", e))
                }
                Err(e) => (false, format!("internal error (fail-closed): {}", e)),
            };

            self.audit.record(AuditEvent::ScreeningLevel {
                instrument: signal.instrument.clone(),
                level: level.name().to_string(),
                passed,
                critical: level.critical(),
                reason: reason.clone(),
            });

            if !passed {
                debug!(
                    "signal for {} blocked by level {}: {}",
                    signal.instrument,
                    level.name(),
                    reason
                );
                match &blocking {
                    // A critical failure outranks an earlier advisory one.
                    Some((_, _, existing_critical)) if !existing_critical && level.critical() => {
                        blocking = Some((level.name(), reason, true));
                    }
                    Some(_) => {}
                    None => blocking = Some((level.name(), reason, level.critical())),
                }
            }
        }

        let verdict = match blocking {
            Some((name, reason, critical)) => ScreeningVerdict::blocked(name, reason, critical),
            None => ScreeningVerdict::pass(),
        };

        self.audit.record(AuditEvent::ScreeningVerdict {
            instrument: signal.instrument.clone(),
            strategy_id: signal.strategy_id.clone(),
            passed: verdict.passed,
            blocking_level: verdict.blocking_level.clone(),
            reason: verdict.reason.clone(),
        });
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use crate::error::EngineError;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct StubLevel {
        name: &'static str,
        critical: bool,
        outcome: fn() -> Result<LevelOutcome>,
        calls: Arc<AtomicU32>,
    }

    impl ScreenLevel for StubLevel {
        fn name(&self) -> &'static str {
            self.name
        }
        fn critical(&self) -> bool {
            self.critical
        }
        fn evaluate(&self, _signal: &Signal, _ctx: &ScreeningContext<'_>) -> Result<LevelOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn stub(
        name: &'static str,
        critical: bool,
        outcome: fn() -> Result<LevelOutcome>,
    ) -> (Box<dyn ScreenLevel>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Box::new(StubLevel {
                name,
                critical,
                outcome,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    fn signal() -> Signal {
        Signal {
            instrument: "ES".to_string(),
            direction: Direction::Long,
            entry_price: dec!(100),
            stop_loss: dec!(98),
            target: dec!(106),
            strategy_id: "breakout".to_string(),
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

    fn pipeline(levels: Vec<Box<dyn ScreenLevel>>, fail_open: bool) -> ScreeningPipeline {
        let (audit, _rx) = AuditSink::detached(256);
        ScreeningPipeline::new(levels, fail_open, HashSet::new(), audit)
    }

    #[test]
    fn critical_failure_blocks_even_under_fail_open() {
        let (critical, _) = stub("portfolio_risk", true, || {
            Ok(LevelOutcome::Fail("limit reached".to_string()))
        });
        let p = pipeline(vec![critical], true);
        let verdict = p.validate(&signal(), &ctx(&[], &[]));
        assert!(!verdict.passed);
        assert!(verdict.is_critical);
        assert_eq!(verdict.blocking_level.as_deref(), Some("portfolio_risk"));
    }

    #[test]
    fn advisory_error_passes_under_fail_open() {
        let (errored, _) = stub("trend_alignment", false, || {
            Err(EngineError::Indicator("nan".to_string()))
        });
        let (pass, _) = stub("gap_analysis", false, || Ok(LevelOutcome::Pass));
        let p = pipeline(vec![errored, pass], true);
        let verdict = p.validate(&signal(), &ctx(&[], &[]));
        assert!(verdict.passed);
    }

    #[test]
    fn advisory_error_blocks_under_fail_closed() {
        let (errored, _) = stub("trend_alignment", false, || {
            Err(EngineError::Indicator("nan".to_string()))
        });
        let p = pipeline(vec![errored], false);
        let verdict = p.validate(&signal(), &ctx(&[], &[]));
        assert!(!verdict.passed);
        assert!(!verdict.is_critical);
    }

    #[test]
    fn advisory_failure_short_circuits_advisories_but_not_criticals() {
        let (fail_adv, fail_calls) = stub("gap_analysis", false, || {
            Ok(LevelOutcome::Fail("gapped".to_string()))
        });
        let (skipped_adv, skipped_calls) = stub("breadth", false, || Ok(LevelOutcome::Pass));
        let (critical, critical_calls) = stub("portfolio_risk", true, || Ok(LevelOutcome::Pass));
        let p = pipeline(vec![fail_adv, skipped_adv, critical], true);

        let verdict = p.validate(&signal(), &ctx(&[], &[]));
        assert!(!verdict.passed);
        assert_eq!(fail_calls.load(Ordering::SeqCst), 1);
        assert_eq!(skipped_calls.load(Ordering::SeqCst), 0);
        assert_eq!(critical_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn later_critical_failure_outranks_earlier_advisory_block() {
        let (fail_adv, _) = stub("gap_analysis", false, || {
            Ok(LevelOutcome::Fail("gapped".to_string()))
        });
        let (fail_crit, _) = stub("portfolio_risk", true, || {
            Ok(LevelOutcome::Fail("too much risk".to_string()))
        });
        let p = pipeline(vec![fail_adv, fail_crit], true);
        let verdict = p.validate(&signal(), &ctx(&[], &[]));
        assert!(verdict.is_critical);
        assert_eq!(verdict.blocking_level.as_deref(), Some("portfolio_risk"));
    }

    #[test]
    fn disabled_level_is_skipped() {
        let (fail_adv, calls) = stub("gap_analysis", false, || {
            Ok(LevelOutcome::Fail("gapped".to_string()))
        });
        let (audit, _rx) = AuditSink::detached(256);
        let mut disabled = HashSet::new();
        disabled.insert("gap_analysis".to_string());
        let p = ScreeningPipeline::new(vec![fail_adv], true, disabled, audit);

        let verdict = p.validate(&signal(), &ctx(&[], &[]));
        assert!(verdict.passed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn every_level_verdict_is_audited() {
        let (pass, _) = stub("a", false, || Ok(LevelOutcome::Pass));
        let (fail, _) = stub("b", true, || Ok(LevelOutcome::Fail("no".to_string())));
        let (audit, mut rx) = AuditSink::detached(256);
        let p = ScreeningPipeline::new(vec![pass, fail], true, HashSet::new(), audit);
        let _ = p.validate(&signal(), &ctx(&[], &[]));

        let mut level_events = 0;
        let mut verdict_events = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                AuditEvent::ScreeningLevel { .. } => level_events += 1,
                AuditEvent::ScreeningVerdict { .. } => verdict_events += 1,
                _ => {}
            }
        }
        assert_eq!(level_events, 2);
        assert_eq!(verdict_events, 1);
    }
}

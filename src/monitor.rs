//! Fast position-protection loop.
//!
//! Runs on the tightest schedule in the engine and must stay fast
//! regardless of network state: all ledger work happens in short lock
//! sections, exit intents are collected first, and only then are closing
//! orders placed with no lock held. A failed closing order keeps the
//! position in the ledger — real venue exposure is never forgotten — and
//! is retried on the next cycle.
//!
//! Per position, each cycle:
//! 1. record a new peak favorable price;
//! 2. breakeven rule: once favorable excursion reaches `breakeven_rr`
//!    times the initial risk, move the stop to entry, exactly once;
//! 3. trailing rule: once breakeven has been moved (on a prior cycle),
//!    ratchet the stop to entry ± `trail_fraction` × peak excursion,
//!    tighten-only;
//! 4. exit checks, every cycle regardless: stop breach, target reached,
//!    or the once-per-session flatten ahead of session end.

use crate::audit::{AuditEvent, AuditSink};
use crate::candles::CandleAggregator;
use crate::domain::{Direction, Position};
use crate::engine::ExposureGuard;
use crate::error::OrderError;
use crate::gateway::{OrderGateway, OrderRequest};
use crate::ledger::{PositionLedger, StopMove};
use crate::retry::{timeout_or, RetryPolicy};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_ms: u64,
    /// Favorable excursion in multiples of initial risk that arms the
    /// breakeven move.
    pub breakeven_rr: Decimal,
    /// Fraction of peak excursion locked in by the trailing stop.
    pub trail_fraction: Decimal,
    pub session_end: NaiveTime,
    /// Flatten everything this many minutes before session end.
    pub flatten_lead_minutes: i64,
    pub order_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_ms: 500,
            breakeven_rr: Decimal::ONE,
            trail_fraction: Decimal::new(5, 1),
            session_end: NaiveTime::from_hms_opt(21, 45, 0).expect("valid session end"),
            flatten_lead_minutes: 15,
            order_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    Target,
    SessionEnd,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop loss breached"),
            ExitReason::Target => write!(f, "target reached"),
            ExitReason::SessionEnd => write!(f, "session-end flatten"),
        }
    }
}

pub struct PositionMonitor {
    cfg: MonitorConfig,
    ledger: Arc<PositionLedger>,
    candles: Arc<CandleAggregator>,
    gateway: Arc<dyn OrderGateway>,
    guard: Arc<ExposureGuard>,
    retry: RetryPolicy,
    audit: AuditSink,
    flattened_on: Mutex<Option<NaiveDate>>,
}

impl PositionMonitor {
    pub fn new(
        cfg: MonitorConfig,
        ledger: Arc<PositionLedger>,
        candles: Arc<CandleAggregator>,
        gateway: Arc<dyn OrderGateway>,
        guard: Arc<ExposureGuard>,
        retry: RetryPolicy,
        audit: AuditSink,
    ) -> Self {
        Self {
            cfg,
            ledger,
            candles,
            gateway,
            guard,
            retry,
            audit,
            flattened_on: Mutex::new(None),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.cfg.poll_ms)
    }

    /// Breakeven arms once unrealized favorable excursion covers the
    /// initial risk `breakeven_rr` times over.
    pub fn breakeven_due(position: &Position, price: Decimal, breakeven_rr: Decimal) -> bool {
        if position.breakeven_moved {
            return false;
        }
        let risk = position.risk_per_unit();
        if risk.is_zero() {
            return false;
        }
        position.favorable_excursion(price) >= breakeven_rr * risk
    }

    /// Trailing stop candidate from the recorded peak; `None` until the
    /// breakeven move has happened.
    pub fn trailing_candidate(position: &Position, trail_fraction: Decimal) -> Option<Decimal> {
        if !position.breakeven_moved {
            return None;
        }
        let excursion = position.favorable_excursion(position.peak_favorable_price);
        if excursion <= Decimal::ZERO {
            return None;
        }
        Some(match position.direction {
            Direction::Long => position.entry_price + trail_fraction * excursion,
            Direction::Short => position.entry_price - trail_fraction * excursion,
        })
    }

    /// One monitoring pass over every open position.
    pub async fn run_cycle(&self, now: DateTime<Utc>) {
        let session_flatten = self.session_flatten_due(now);
        let mut exits: Vec<(Position, ExitReason, Decimal)> = Vec::new();

        for snapshot in self.ledger.get_all() {
            let instrument = snapshot.instrument.clone();
            let price = match self.candles.last_price(&instrument) {
                Some(p) => p,
                None => continue,
            };

            self.ledger.update_peak(&instrument, price);

            let mut moved_breakeven_this_cycle = false;
            if let Some(pos) = self.ledger.get(&instrument) {
                if Self::breakeven_due(&pos, price, self.cfg.breakeven_rr) {
                    if let Some((from, to)) = self.ledger.move_stop_to_breakeven(&instrument) {
                        moved_breakeven_this_cycle = true;
                        info!("{}: stop moved to breakeven ({} -> {})", instrument, from, to);
                        self.audit.record(AuditEvent::StopMoved {
                            instrument: instrument.clone(),
                            from,
                            to,
                            rule: "breakeven".to_string(),
                        });
                    }
                }
            }

            // The trailing ratchet starts the cycle after breakeven.
            if !moved_breakeven_this_cycle {
                if let Some(pos) = self.ledger.get(&instrument) {
                    if let Some(candidate) =
                        Self::trailing_candidate(&pos, self.cfg.trail_fraction)
                    {
                        let from = pos.stop_loss;
                        if let Ok(StopMove::Tightened) =
                            self.ledger.update_stop(&instrument, candidate)
                        {
                            debug!("{}: trailing stop {} -> {}", instrument, from, candidate);
                            self.audit.record(AuditEvent::StopMoved {
                                instrument: instrument.clone(),
                                from,
                                to: candidate,
                                rule: "trailing".to_string(),
                            });
                        }
                    }
                }
            }

            if let Some(pos) = self.ledger.get(&instrument) {
                let reason = if pos.is_stop_hit(price) {
                    Some(ExitReason::StopLoss)
                } else if pos.is_target_hit(price) {
                    Some(ExitReason::Target)
                } else if session_flatten {
                    Some(ExitReason::SessionEnd)
                } else {
                    None
                };
                if let Some(reason) = reason {
                    exits.push((pos, reason, price));
                }
            }
        }

        // Snapshot-then-act: orders go out with no ledger lock held.
        for (position, reason, price) in exits {
            self.close_position(position, reason, price).await;
        }
    }

    async fn close_position(&self, position: Position, reason: ExitReason, price: Decimal) {
        let instrument = position.instrument.clone();
        let request = OrderRequest::exit(&position);
        let timeout = Duration::from_millis(self.cfg.order_timeout_ms);

        let result = self
            .retry
            .run("closing order", OrderError::is_transient, || {
                let request = request.clone();
                async move {
                    timeout_or(timeout, self.gateway.place_order(&request), |ms| {
                        OrderError::Timeout { elapsed_ms: ms }
                    })
                    .await
                }
            })
            .await;

        match result {
            Ok(ack) => {
                self.ledger.remove(&instrument);
                self.guard.release(&instrument);
                let why = format!("{} at {}", reason, price);
                info!(
                    "closed {} {} x{} @ {}: {}",
                    position.direction, instrument, position.quantity, ack.fill_price, why
                );
                self.audit.record(AuditEvent::PositionClosed {
                    instrument,
                    reason: why,
                    exit_price: ack.fill_price,
                });
            }
            Err(e) => {
                // The venue may still hold this exposure; the position
                // stays in the ledger until a fill is confirmed.
                error!(
                    "failed to close {} ({}): {}; keeping position for retry next cycle",
                    instrument, reason, e
                );
                self.audit.record(AuditEvent::OrderFailed {
                    instrument,
                    correlation_id: request.correlation_id.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// True exactly once per session day, from `flatten_lead_minutes`
    /// before session end onward. The flag resets when the date changes.
    fn session_flatten_due(&self, now: DateTime<Utc>) -> bool {
        let flatten_at =
            self.cfg.session_end - ChronoDuration::minutes(self.cfg.flatten_lead_minutes);
        if now.time() < flatten_at {
            return false;
        }
        let today = now.date_naive();
        let mut flag = self.flattened_on.lock().expect("flatten flag poisoned");
        if *flag == Some(today) {
            false
        } else {
            *flag = Some(today);
            true
        }
    }
}

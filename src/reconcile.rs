//! Periodic reconciliation against the venue's authoritative positions.
//!
//! Runs on the slow schedule. Local positions with no venue counterpart
//! are phantoms: the venue says the exposure does not exist, so the ledger
//! entry is force-removed and the discrepancy logged as a warning. Venue
//! positions with no local counterpart are logged but never auto-adopted:
//! the engine cannot know their intent, stop or target, so fabricating a
//! ledger entry would be guesswork. Operator alerting beyond the audit
//! stream is left to the audit consumer.

use crate::audit::{AuditEvent, AuditSink};
use crate::engine::ExposureGuard;
use crate::error::{OrderError, Result};
use crate::gateway::OrderGateway;
use crate::ledger::PositionLedger;
use crate::retry::{timeout_or, RetryPolicy};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    pub fetch_timeout_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            fetch_timeout_ms: 10_000,
        }
    }
}

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    /// Local positions examined.
    pub checked: usize,
    pub phantoms_removed: Vec<String>,
    pub unclaimed_venue: Vec<String>,
    pub duration_ms: u64,
}

pub struct ReconciliationService {
    cfg: ReconcileConfig,
    ledger: Arc<PositionLedger>,
    gateway: Arc<dyn OrderGateway>,
    guard: Arc<ExposureGuard>,
    retry: RetryPolicy,
    audit: AuditSink,
}

impl ReconciliationService {
    pub fn new(
        cfg: ReconcileConfig,
        ledger: Arc<PositionLedger>,
        gateway: Arc<dyn OrderGateway>,
        guard: Arc<ExposureGuard>,
        retry: RetryPolicy,
        audit: AuditSink,
    ) -> Self {
        Self {
            cfg,
            ledger,
            gateway,
            guard,
            retry,
            audit,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.cfg.interval_secs)
    }

    /// One reconciliation cycle: fetch, diff by instrument, repair.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.cfg.fetch_timeout_ms);

        let venue_positions = self
            .retry
            .run("reconciliation fetch", OrderError::is_transient, || async {
                timeout_or(timeout, self.gateway.open_positions(), |ms| {
                    OrderError::Timeout { elapsed_ms: ms }
                })
                .await
            })
            .await?;

        let venue: HashMap<String, Decimal> = venue_positions
            .into_iter()
            .filter(|p| p.quantity > Decimal::ZERO)
            .map(|p| (p.instrument, p.quantity))
            .collect();

        let local = self.ledger.get_all();
        let checked = local.len();
        let mut phantoms_removed = Vec::new();

        for position in &local {
            if venue.contains_key(&position.instrument) {
                continue;
            }
            warn!(
                "phantom position: {} {} x{} tracked locally but absent at the venue; force-removing",
                position.direction, position.instrument, position.quantity
            );
            self.ledger.remove(&position.instrument);
            self.guard.release(&position.instrument);
            self.audit.record(AuditEvent::PhantomPositionRemoved {
                instrument: position.instrument.clone(),
            });
            phantoms_removed.push(position.instrument.clone());
        }

        let mut unclaimed_venue = Vec::new();
        for (instrument, quantity) in &venue {
            if local.iter().any(|p| &p.instrument == instrument) {
                continue;
            }
            warn!(
                "venue reports {} x{} with no local counterpart; not adopting",
                instrument, quantity
            );
            self.audit.record(AuditEvent::UnclaimedVenuePosition {
                instrument: instrument.clone(),
                quantity: *quantity,
            });
            unclaimed_venue.push(instrument.clone());
        }

        let report = ReconcileReport {
            checked,
            phantoms_removed,
            unclaimed_venue,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "reconciliation: {} local checked, {} phantom(s) removed, {} unclaimed venue position(s) ({}ms)",
            report.checked,
            report.phantoms_removed.len(),
            report.unclaimed_venue.len(),
            report.duration_ms
        );
        Ok(report)
    }
}

//! Fire-and-forget audit sink.
//!
//! Every Signal, screening verdict, position transition and reconciliation
//! discrepancy is recorded as a structured event. Producers never block:
//! events go through a bounded channel with `try_send`, and a drain task
//! emits them as JSON lines on the `audit` tracing target. When the buffer
//! is full the event is dropped and counted, never silently lost.

use crate::domain::Direction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Structured audit event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Signal {
        instrument: String,
        strategy_id: String,
        direction: Direction,
        entry_price: Decimal,
        confidence: u8,
        rationale: String,
    },
    ScreeningLevel {
        instrument: String,
        level: String,
        passed: bool,
        critical: bool,
        reason: String,
    },
    ScreeningVerdict {
        instrument: String,
        strategy_id: String,
        passed: bool,
        blocking_level: Option<String>,
        reason: String,
    },
    RetestQueued {
        instrument: String,
        breakout_price: Decimal,
        deadline: DateTime<Utc>,
    },
    RetestFilled {
        instrument: String,
        retest_price: Decimal,
    },
    RetestExpired {
        instrument: String,
    },
    RetestAbandoned {
        instrument: String,
        reason: String,
    },
    PositionOpened {
        instrument: String,
        direction: Direction,
        entry_price: Decimal,
        quantity: Decimal,
        order_id: String,
    },
    StopMoved {
        instrument: String,
        from: Decimal,
        to: Decimal,
        rule: String,
    },
    PositionClosed {
        instrument: String,
        reason: String,
        exit_price: Decimal,
    },
    PhantomPositionRemoved {
        instrument: String,
    },
    UnclaimedVenuePosition {
        instrument: String,
        quantity: Decimal,
    },
    OrderFailed {
        instrument: String,
        correlation_id: String,
        error: String,
    },
    OrdersSuspended {
        reason: String,
    },
}

/// Cheap cloneable handle for recording audit events.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    /// Create a sink and spawn its drain task. Requires a tokio runtime.
    pub fn spawn(capacity: usize) -> (Self, JoinHandle<()>) {
        let (sink, mut rx) = Self::detached(capacity);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => info!(target: "audit", "{}", line),
                    Err(e) => warn!("failed to serialize audit event: {}", e),
                }
            }
        });
        (sink, handle)
    }

    /// Create a sink without a drain task; the receiver is handed back to
    /// the caller. Used by tests to assert on the recorded stream.
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Record an event. Never blocks; drops and counts when the buffer is
    /// full or the drain task is gone.
    pub fn record(&self, event: AuditEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

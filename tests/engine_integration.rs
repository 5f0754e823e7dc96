//! End-to-end runs of the execution core against the simulated feed and
//! the in-memory paper gateway.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use windlass::audit::AuditSink;
use windlass::candles::CandleAggregator;
use windlass::domain::{Direction, PendingRetest, Tick};
use windlass::engine::{EngineState, EngineSupervisor, ExposureGuard};
use windlass::feed::{SimFeed, SimFeedConfig};
use windlass::gateway::{OrderGateway, OrderRequest, PaperGateway};
use windlass::indicators::StdIndicators;
use windlass::ledger::PositionLedger;
use windlass::monitor::PositionMonitor;
use windlass::reconcile::{ReconcileConfig, ReconciliationService};
use windlass::retest::{RetestConfig, RetestEvent, RetestWaitQueue};
use windlass::retry::RetryPolicy;
use windlass::screening::levels::{standard_levels, ScreeningSettings};
use windlass::screening::{ScreeningContext, ScreeningPipeline};
use windlass::strategy::{EntryStyle, RouterConfig, StrategyRouter};
use windlass::EngineConfig;

fn tick(instrument: &str, price: Decimal, secs: i64) -> Tick {
    Tick {
        instrument: instrument.to_string(),
        price,
        size: Some(dec!(1)),
        ts: DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
    }
}

/// Feed one minute bucket with an open, high, low and close print.
fn feed_bucket(candles: &CandleAggregator, instrument: &str, bucket: i64, prices: [Decimal; 4]) {
    let base = bucket * 60;
    candles.ingest(tick(instrument, prices[0], base + 1));
    candles.ingest(tick(instrument, prices[1], base + 15));
    candles.ingest(tick(instrument, prices[2], base + 30));
    candles.ingest(tick(instrument, prices[3], base + 45));
}

fn midday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn paper_engine_starts_and_stops_cleanly() {
    let cfg = EngineConfig::paper_defaults(vec!["ES".to_string(), "NQ".to_string()]);
    let candles = Arc::new(CandleAggregator::new(cfg.candle_config()));
    let gateway = Arc::new(PaperGateway::new(candles.clone()));
    let feed = Arc::new(SimFeed::new(SimFeedConfig {
        tick_interval_ms: 2,
        ..SimFeedConfig::default()
    }));

    let engine =
        EngineSupervisor::new(cfg, candles, feed, gateway, Arc::new(StdIndicators)).unwrap();
    assert_eq!(engine.status().state, EngineState::Idle);

    engine.start().await.unwrap();
    let snapshot = engine.status();
    assert_eq!(snapshot.state, EngineState::Running);
    assert!(snapshot.feed_connected);
    assert!(!snapshot.orders_suspended);
    assert_eq!(snapshot.instruments, vec!["ES".to_string(), "NQ".to_string()]);

    // Let the loops take a few turns before shutting down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.stop().await;
    assert_eq!(engine.status().state, EngineState::Stopped);
}

/// The full long path: ticks fold into bars, the router picks the breakout
/// generator on a trending tape, screening admits the signal, the retest
/// queue waits for the pullback, the paper gateway fills at the retest
/// price, and the monitor walks the position through breakeven, trailing
/// and the target exit.
#[tokio::test]
async fn breakout_retest_entry_rides_to_target_exit() {
    let candles = Arc::new(CandleAggregator::new(Default::default()));
    let gateway = Arc::new(PaperGateway::new(candles.clone()));
    let ledger = Arc::new(PositionLedger::new());
    let guard = Arc::new(ExposureGuard::new());
    let retest = RetestWaitQueue::new(RetestConfig::default());
    let (audit, _rx) = AuditSink::detached(1024);
    let indicators: Arc<dyn windlass::indicators::IndicatorLibrary> = Arc::new(StdIndicators);

    // 44 range buckets around 100, then a close through the range high.
    for bucket in 0..44 {
        feed_bucket(&candles, "ES", bucket, [dec!(100), dec!(101), dec!(99), dec!(100)]);
    }
    let base = 44 * 60;
    candles.ingest(tick("ES", dec!(100.5), base + 1));
    candles.ingest(tick("ES", dec!(102.5), base + 30));
    candles.rebuild("ES");
    let bars = candles.snapshot("ES");
    assert_eq!(bars.len(), 45);

    let router = StrategyRouter::standard(RouterConfig::default(), indicators.clone());
    let routed = router
        .evaluate(&bars)
        .unwrap()
        .expect("breakout close should produce a signal");
    assert_eq!(routed.entry_style, EntryStyle::AwaitRetest);
    let signal = routed.signal;
    assert_eq!(signal.direction, Direction::Long);
    assert_eq!(signal.entry_price, dec!(102.5));
    assert_eq!(signal.stop_loss, dec!(99));

    let pipeline = ScreeningPipeline::new(
        standard_levels(&ScreeningSettings::default(), indicators),
        true,
        HashSet::new(),
        audit.clone(),
    );
    let ctx = ScreeningContext {
        bars: &bars,
        last_price: dec!(102.5),
        open_positions: &[],
        proposed_quantity: dec!(1),
        breadth: Some(0.5),
        now: midday(),
    };
    let verdict = pipeline.validate(&signal, &ctx);
    assert!(verdict.passed, "blocked by {:?}: {}", verdict.blocking_level, verdict.reason);

    // Claim the instrument and park the breakout for its pullback.
    assert!(guard.try_claim("ES"));
    assert!(retest.try_enqueue(PendingRetest {
        instrument: "ES".to_string(),
        breakout_price: signal.entry_price,
        direction: signal.direction,
        stop_loss: signal.stop_loss,
        target: signal.target,
        quantity: dec!(1),
        created_at: midday(),
        deadline: midday() + ChronoDuration::minutes(30),
    }));

    // Pullback into the tolerance band triggers the real entry at the
    // retest price, not the breakout price.
    candles.ingest(tick("ES", dec!(102.2), base + 70));
    let events = retest.poll(midday(), |i| candles.last_price(i), true);
    let (pending, retest_price) = match events.into_iter().next() {
        Some(RetestEvent::Triggered { retest, retest_price }) => (retest, retest_price),
        other => panic!("expected a trigger, got {:?}", other),
    };
    assert_eq!(retest_price, dec!(102.2));

    let ack = gateway
        .place_order(&OrderRequest::entry(
            &pending.instrument,
            pending.direction,
            pending.quantity,
        ))
        .await
        .unwrap();
    assert_eq!(ack.fill_price, dec!(102.2));
    ledger
        .add(windlass::domain::Position {
            instrument: pending.instrument.clone(),
            direction: pending.direction,
            entry_price: ack.fill_price,
            quantity: ack.filled_quantity,
            stop_loss: pending.stop_loss,
            target: pending.target,
            breakeven_moved: false,
            peak_favorable_price: ack.fill_price,
            order_id: ack.order_id,
            opened_at: midday(),
        })
        .unwrap();
    retest.complete(&pending.instrument);
    assert!(!retest.is_pending("ES"));

    let monitor = PositionMonitor::new(
        Default::default(),
        ledger.clone(),
        candles.clone(),
        gateway.clone() as Arc<dyn OrderGateway>,
        guard.clone(),
        RetryPolicy::new(2, 1, 2),
        audit,
    );

    // Entry 102.2, stop 99: one full risk unit above entry arms breakeven.
    candles.ingest(tick("ES", dec!(106), base + 130));
    monitor.run_cycle(midday()).await;
    let pos = ledger.get("ES").unwrap();
    assert!(pos.breakeven_moved);
    assert_eq!(pos.stop_loss, dec!(102.2));

    // New peak ratchets the trailing stop to entry + half the excursion.
    candles.ingest(tick("ES", dec!(108), base + 190));
    monitor.run_cycle(midday()).await;
    let pos = ledger.get("ES").unwrap();
    assert_eq!(pos.stop_loss, dec!(105.1));

    // Target touch closes the position and releases the claim.
    candles.ingest(tick("ES", dec!(109.5), base + 250));
    monitor.run_cycle(midday()).await;
    assert!(ledger.get("ES").is_none());
    assert!(!guard.is_engaged("ES"));
    assert!(gateway.open_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn screening_blocks_poor_signals_with_reasons() {
    let (audit, _rx) = AuditSink::detached(256);
    let indicators: Arc<dyn windlass::indicators::IndicatorLibrary> = Arc::new(StdIndicators);
    let candles = CandleAggregator::new(Default::default());
    for bucket in 0..45 {
        feed_bucket(&candles, "ES", bucket, [dec!(100), dec!(101), dec!(99), dec!(100)]);
    }
    candles.rebuild("ES");
    let bars = candles.snapshot("ES");

    let mut settings = ScreeningSettings::default();
    settings.blacklist.insert("CL".to_string());
    let pipeline = ScreeningPipeline::new(
        standard_levels(&settings, indicators),
        true,
        HashSet::new(),
        audit,
    );
    let ctx = ScreeningContext {
        bars: &bars,
        last_price: dec!(100),
        open_positions: &[],
        proposed_quantity: dec!(1),
        breadth: Some(0.5),
        now: midday(),
    };

    // A target barely past the entry fails the reward floor (advisory).
    let poor = windlass::domain::Signal {
        instrument: "ES".to_string(),
        direction: Direction::Long,
        entry_price: dec!(100),
        stop_loss: dec!(98),
        target: dec!(101),
        strategy_id: "breakout".to_string(),
        confidence: 80,
        rationale: "test".to_string(),
    };
    let verdict = pipeline.validate(&poor, &ctx);
    assert!(!verdict.passed);
    assert!(!verdict.is_critical);
    assert_eq!(verdict.blocking_level.as_deref(), Some("risk_reward"));
    assert!(!verdict.reason.is_empty());

    // A blacklisted instrument is a critical block even under fail-open.
    let banned = windlass::domain::Signal {
        instrument: "CL".to_string(),
        ..poor.clone()
    };
    let verdict = pipeline.validate(&banned, &ctx);
    assert!(!verdict.passed);
    assert!(verdict.is_critical);
    assert_eq!(verdict.blocking_level.as_deref(), Some("symbol_blacklist"));
}

#[tokio::test]
async fn reconciliation_clears_phantom_and_reports_unclaimed() {
    let candles = Arc::new(CandleAggregator::new(Default::default()));
    let gateway = Arc::new(PaperGateway::new(candles.clone()));
    let ledger = Arc::new(PositionLedger::new());
    let guard = Arc::new(ExposureGuard::new());
    let (audit, _rx) = AuditSink::detached(256);

    // The venue only knows about CL; the ledger only about NQ.
    candles.ingest(tick("CL", dec!(70), 1));
    gateway
        .place_order(&OrderRequest::entry("CL", Direction::Long, dec!(2)))
        .await
        .unwrap();
    guard.try_claim("NQ");
    ledger
        .add(windlass::domain::Position {
            instrument: "NQ".to_string(),
            direction: Direction::Long,
            entry_price: dec!(15000),
            quantity: dec!(1),
            stop_loss: dec!(14900),
            target: dec!(15300),
            breakeven_moved: false,
            peak_favorable_price: dec!(15000),
            order_id: "ord-nq".to_string(),
            opened_at: midday(),
        })
        .unwrap();

    let service = ReconciliationService::new(
        ReconcileConfig::default(),
        ledger.clone(),
        gateway as Arc<dyn OrderGateway>,
        guard.clone(),
        RetryPolicy::new(2, 1, 2),
        audit,
    );
    let report = service.reconcile().await.unwrap();

    assert_eq!(report.phantoms_removed, vec!["NQ".to_string()]);
    assert_eq!(report.unclaimed_venue, vec!["CL".to_string()]);
    assert!(ledger.is_empty());
    assert!(!guard.is_engaged("NQ"), "claim released with the phantom");
}

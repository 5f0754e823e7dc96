//! Engine supervision.
//!
//! Owns every component and the scheduled loops that drive them: feed
//! pump, bar rebuild, strategy+screening, retest watcher, position
//! monitor, reconciliation. Each loop is its own tokio task selecting on
//! a shared shutdown signal; shutdown is only observed between
//! iterations, so an in-flight order submission always completes before
//! its loop exits. The position monitor never shares a loop with order
//! placement elsewhere — exit evaluation is never delayed by entries,
//! reconnects or reconciliation.

use crate::audit::{AuditEvent, AuditSink};
use crate::candles::CandleAggregator;
use crate::config::EngineConfig;
use crate::domain::{Direction, PendingRetest, Position, Signal};
use crate::engine::ExposureGuard;
use crate::error::{EngineError, FeedError, OrderError, Result};
use crate::feed::MarketFeed;
use crate::gateway::{OrderGateway, OrderRequest};
use crate::indicators::{IndicatorKind, IndicatorLibrary, IndicatorRequest};
use crate::ledger::PositionLedger;
use crate::monitor::PositionMonitor;
use crate::reconcile::ReconciliationService;
use crate::retest::{RetestEvent, RetestWaitQueue};
use crate::retry::{timeout_or, RetryPolicy};
use crate::screening::levels::standard_levels;
use crate::screening::{ScreeningContext, ScreeningPipeline};
use crate::strategy::{EntryStyle, StrategyRouter};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Starting => write!(f, "starting"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of the engine for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub uptime_secs: u64,
    pub feed_connected: bool,
    pub orders_suspended: bool,
    pub open_positions: Vec<Position>,
    pub pending_retests: Vec<PendingRetest>,
    pub audit_events_dropped: u64,
    pub instruments: Vec<String>,
}

pub struct EngineSupervisor {
    core: Arc<EngineCore>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    audit_drain: Mutex<Option<JoinHandle<()>>>,
}

struct EngineCore {
    cfg: EngineConfig,
    candles: Arc<CandleAggregator>,
    ledger: Arc<PositionLedger>,
    retest: Arc<RetestWaitQueue>,
    guard: Arc<ExposureGuard>,
    router: StrategyRouter,
    screening: ScreeningPipeline,
    monitor: PositionMonitor,
    reconciler: ReconciliationService,
    feed: Arc<dyn MarketFeed>,
    gateway: Arc<dyn OrderGateway>,
    indicators: Arc<dyn IndicatorLibrary>,
    retry: RetryPolicy,
    audit: AuditSink,
    state: Mutex<EngineState>,
    orders_suspended: AtomicBool,
    started_at: Mutex<Option<Instant>>,
}

impl EngineSupervisor {
    /// Wire every component from config. Needs a tokio runtime (the audit
    /// drain task is spawned here). The aggregator comes from the caller
    /// so paper gateways can mark fills off the same bar state the engine
    /// builds. Invalid configuration refuses to build — the engine never
    /// starts half-configured.
    pub fn new(
        cfg: EngineConfig,
        candles: Arc<CandleAggregator>,
        feed: Arc<dyn MarketFeed>,
        gateway: Arc<dyn OrderGateway>,
        indicators: Arc<dyn IndicatorLibrary>,
    ) -> Result<Self> {
        if let Err(errors) = cfg.validate() {
            return Err(EngineError::InvalidConfig(errors.join("; ")));
        }
        let monitor_cfg = cfg.monitor_config()?;
        let router_cfg = cfg.router_config()?;
        let retry = cfg.retry_policy();

        let (audit, audit_drain) = AuditSink::spawn(cfg.engine.audit_buffer);
        let ledger = Arc::new(PositionLedger::new());
        let retest = Arc::new(RetestWaitQueue::new(cfg.retest_config()));
        let guard = Arc::new(ExposureGuard::new());

        let router = StrategyRouter::standard(router_cfg, indicators.clone());
        let screening = ScreeningPipeline::new(
            standard_levels(&cfg.screening_settings(), indicators.clone()),
            cfg.screening.fail_open,
            cfg.disabled_levels(),
            audit.clone(),
        );
        let monitor = PositionMonitor::new(
            monitor_cfg,
            ledger.clone(),
            candles.clone(),
            gateway.clone(),
            guard.clone(),
            retry.clone(),
            audit.clone(),
        );
        let reconciler = ReconciliationService::new(
            cfg.reconcile_config(),
            ledger.clone(),
            gateway.clone(),
            guard.clone(),
            retry.clone(),
            audit.clone(),
        );

        let (shutdown, _) = watch::channel(false);
        let core = Arc::new(EngineCore {
            cfg,
            candles,
            ledger,
            retest,
            guard,
            router,
            screening,
            monitor,
            reconciler,
            feed,
            gateway,
            indicators,
            retry,
            audit,
            state: Mutex::new(EngineState::Idle),
            orders_suspended: AtomicBool::new(false),
            started_at: Mutex::new(None),
        });

        Ok(Self {
            core,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            audit_drain: Mutex::new(Some(audit_drain)),
        })
    }

    /// Startup sequencing: connect, seed history, subscribe, then spawn
    /// the loops. Any failure here refuses the start and leaves the
    /// engine stopped.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.core.lock_state();
            match *state {
                EngineState::Idle | EngineState::Stopped => *state = EngineState::Starting,
                other => {
                    return Err(EngineError::Validation(format!(
                        "engine cannot start while {}",
                        other
                    )))
                }
            }
        }

        if let Err(e) = self.core.startup().await {
            error!("engine refused to start: {}", e);
            *self.core.lock_state() = EngineState::Stopped;
            return Err(e);
        }

        self.spawn_loops();
        *self.core.lock_state() = EngineState::Running;
        *self
            .core
            .started_at
            .lock()
            .expect("started_at poisoned") = Some(Instant::now());
        info!(
            "engine running: {} instruments, {} screening levels enabled",
            self.core.cfg.instruments.len(),
            self.core.screening.enabled_levels().len()
        );
        Ok(())
    }

    fn spawn_loops(&self) {
        let mut tasks = self.tasks.lock().expect("task list poisoned");

        let core = self.core.clone();
        let rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { core.feed_pump(rx).await }));

        let core = self.core.clone();
        let rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { core.aggregator_loop(rx).await }));

        let core = self.core.clone();
        let rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { core.strategy_loop(rx).await }));

        let core = self.core.clone();
        let rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { core.retest_loop(rx).await }));

        let core = self.core.clone();
        let rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { core.monitor_loop(rx).await }));

        let core = self.core.clone();
        let rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { core.reconcile_loop(rx).await }));
    }

    /// Graceful stop: signal every loop, then wait for each to finish its
    /// current iteration. Orders already sent are never cancelled here.
    pub async fn stop(&self) {
        {
            let mut state = self.core.lock_state();
            match *state {
                EngineState::Running | EngineState::Starting => *state = EngineState::Stopping,
                _ => return,
            }
        }
        info!("stopping engine");
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("task list poisoned");
            guard.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("engine loop ended abnormally: {}", e);
                }
            }
        }

        if let Some(drain) = self
            .audit_drain
            .lock()
            .expect("audit drain poisoned")
            .take()
        {
            drain.abort();
        }

        *self.core.lock_state() = EngineState::Stopped;
        info!("engine stopped");
    }

    pub fn status(&self) -> EngineSnapshot {
        let uptime_secs = self
            .core
            .started_at
            .lock()
            .expect("started_at poisoned")
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        EngineSnapshot {
            state: *self.core.lock_state(),
            uptime_secs,
            feed_connected: self.core.feed.is_connected(),
            orders_suspended: self.core.orders_suspended.load(Ordering::SeqCst),
            open_positions: self.core.ledger.get_all(),
            pending_retests: self.core.retest.snapshot(),
            audit_events_dropped: self.core.audit.dropped(),
            instruments: self.core.cfg.instruments.clone(),
        }
    }
}

impl EngineCore {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine state poisoned")
    }

    fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.cfg.engine.feed_timeout_ms)
    }

    async fn startup(&self) -> Result<()> {
        info!(
            "connecting market feed for {:?}",
            self.cfg.instruments
        );
        let timeout = self.feed_timeout();
        self.retry
            .run("feed connect", FeedError::is_transient, || async {
                timeout_or(timeout, self.feed.connect(), |ms| FeedError::Timeout {
                    elapsed_ms: ms,
                })
                .await
            })
            .await?;

        // History is fetched once; a miss only delays signal generation
        // until enough live bars accumulate.
        for instrument in &self.cfg.instruments {
            let fetched = self
                .retry
                .run("history fetch", FeedError::is_transient, || async {
                    timeout_or(
                        timeout,
                        self.feed.history(instrument, self.cfg.engine.history_bars),
                        |ms| FeedError::Timeout { elapsed_ms: ms },
                    )
                    .await
                })
                .await;
            match fetched {
                Ok(bars) => self.candles.merge_history(instrument, bars),
                Err(e) => warn!(
                    "history unavailable for {}: {}; building bars from live ticks only",
                    instrument, e
                ),
            }
        }

        self.retry
            .run("feed subscribe", FeedError::is_transient, || async {
                timeout_or(
                    timeout,
                    self.feed.subscribe(&self.cfg.instruments),
                    |ms| FeedError::Timeout { elapsed_ms: ms },
                )
                .await
            })
            .await?;
        Ok(())
    }

    // ---- loops ----

    async fn feed_pump(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            // A feed that goes quiet for the whole timeout window is treated
            // the same as a disconnect: reconnect and re-subscribe.
            let next = timeout_or(self.feed_timeout(), self.feed.next_tick(), |ms| {
                FeedError::Timeout { elapsed_ms: ms }
            });
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                tick = next => match tick {
                    Ok(tick) => self.candles.ingest(tick),
                    Err(e) => {
                        warn!("market feed error: {}", e);
                        if !self.reconnect_feed(&mut shutdown).await {
                            break;
                        }
                    }
                }
            }
        }
        debug!("feed pump stopped");
    }

    /// Capped exponential backoff with jitter, unlimited attempts while
    /// the engine runs. Re-subscription replays the same ordered
    /// instrument list before bar building resumes.
    async fn reconnect_feed(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let timeout = self.feed_timeout();
        let mut attempt = 0u32;
        loop {
            if *shutdown.borrow() {
                return false;
            }
            attempt += 1;
            let delay = self.retry.delay_for(attempt.min(8));
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return false;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let reconnect = async {
                timeout_or(timeout, self.feed.connect(), |ms| FeedError::Timeout {
                    elapsed_ms: ms,
                })
                .await?;
                timeout_or(
                    timeout,
                    self.feed.subscribe(&self.cfg.instruments),
                    |ms| FeedError::Timeout { elapsed_ms: ms },
                )
                .await
            };
            match reconnect.await {
                Ok(()) => {
                    info!("market feed reconnected after {} attempt(s)", attempt);
                    return true;
                }
                Err(e) => warn!("feed reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }

    async fn aggregator_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(self.cfg.candles.rebuild_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.candles.rebuild_all(),
            }
        }
        debug!("aggregator loop stopped");
    }

    async fn strategy_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.cfg.engine.strategy_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.strategy_cycle().await,
            }
        }
        debug!("strategy loop stopped");
    }

    async fn retest_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(self.cfg.retest.poll_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.retest_cycle().await,
            }
        }
        debug!("retest loop stopped");
    }

    async fn monitor_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.monitor.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.monitor.run_cycle(Utc::now()).await,
            }
        }
        debug!("monitor loop stopped");
    }

    async fn reconcile_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.reconciler.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reconciler.reconcile().await {
                        error!("reconciliation cycle failed: {}", e);
                    }
                }
            }
        }
        debug!("reconcile loop stopped");
    }

    // ---- cycles ----

    async fn strategy_cycle(&self) {
        let now = Utc::now();
        if self.router.in_blackout(now) {
            debug!("blackout window active, skipping strategy cycle");
            return;
        }
        if self.orders_suspended.load(Ordering::SeqCst) {
            debug!("order placement suspended, skipping entries");
            return;
        }

        let open_positions = self.ledger.get_all();
        let breadth = self.market_breadth();

        for instrument in &self.cfg.instruments {
            if self.guard.is_engaged(instrument) {
                continue;
            }
            let bars = self.candles.snapshot(instrument);
            let routed = match self.router.evaluate(&bars) {
                Ok(Some(routed)) => routed,
                Ok(None) => continue,
                Err(EngineError::InsufficientHistory { have, need, .. }) => {
                    debug!("{}: {}/{} bars, waiting for history", instrument, have, need);
                    continue;
                }
                Err(e) => {
                    debug!("{}: signal generation skipped this cycle: {}", instrument, e);
                    continue;
                }
            };

            let signal = routed.signal;
            self.audit.record(AuditEvent::Signal {
                instrument: signal.instrument.clone(),
                strategy_id: signal.strategy_id.clone(),
                direction: signal.direction,
                entry_price: signal.entry_price,
                confidence: signal.confidence,
                rationale: signal.rationale.clone(),
            });

            let quantity = match self.position_size(&signal) {
                Some(q) => q,
                None => {
                    debug!("{}: degenerate stop distance, signal dropped", instrument);
                    continue;
                }
            };

            let last_price = self
                .candles
                .last_price(instrument)
                .unwrap_or(signal.entry_price);
            let ctx = ScreeningContext {
                bars: &bars,
                last_price,
                open_positions: &open_positions,
                proposed_quantity: quantity,
                breadth,
                now,
            };
            let verdict = self.screening.validate(&signal, &ctx);
            if !verdict.passed {
                info!(
                    "blocked {} {} signal for {}: {}",
                    signal.strategy_id, signal.direction, instrument, verdict.reason
                );
                continue;
            }

            if !self.guard.try_claim(instrument) {
                continue;
            }

            match routed.entry_style {
                EntryStyle::AwaitRetest => {
                    let pending = PendingRetest {
                        instrument: instrument.clone(),
                        breakout_price: signal.entry_price,
                        direction: signal.direction,
                        stop_loss: signal.stop_loss,
                        target: signal.target,
                        quantity,
                        created_at: now,
                        deadline: now + ChronoDuration::minutes(self.cfg.retest.ttl_minutes),
                    };
                    if self.retest.try_enqueue(pending.clone()) {
                        info!(
                            "{}: breakout at {} queued for retest until {}",
                            instrument, pending.breakout_price, pending.deadline
                        );
                        self.audit.record(AuditEvent::RetestQueued {
                            instrument: instrument.clone(),
                            breakout_price: pending.breakout_price,
                            deadline: pending.deadline,
                        });
                    } else {
                        self.guard.release(instrument);
                    }
                }
                EntryStyle::Immediate => {
                    match self
                        .submit_entry(
                            instrument,
                            signal.direction,
                            quantity,
                            signal.stop_loss,
                            signal.target,
                        )
                        .await
                    {
                        Some(position) => {
                            if let Err(e) = self.ledger.add(position) {
                                error!("{}: filled entry could not be recorded: {}", instrument, e);
                            }
                        }
                        None => self.guard.release(instrument),
                    }
                }
            }
        }
    }

    async fn retest_cycle(&self) {
        let fills_enabled = !self.orders_suspended.load(Ordering::SeqCst);
        let now = Utc::now();
        let events = self
            .retest
            .poll(now, |i| self.candles.last_price(i), fills_enabled);

        for event in events {
            match event {
                RetestEvent::Expired(retest) => {
                    info!(
                        "{}: retest window expired without a qualifying touch",
                        retest.instrument
                    );
                    self.guard.release(&retest.instrument);
                    self.audit.record(AuditEvent::RetestExpired {
                        instrument: retest.instrument,
                    });
                }
                RetestEvent::Triggered {
                    retest,
                    retest_price,
                } => {
                    match self
                        .submit_entry(
                            &retest.instrument,
                            retest.direction,
                            retest.quantity,
                            retest.stop_loss,
                            retest.target,
                        )
                        .await
                    {
                        Some(position) => {
                            info!(
                                "{}: retest touch at {} filled the breakout entry",
                                retest.instrument, retest_price
                            );
                            self.audit.record(AuditEvent::RetestFilled {
                                instrument: retest.instrument.clone(),
                                retest_price,
                            });
                            if let Err(e) = self.ledger.add(position) {
                                error!(
                                    "{}: filled retest entry could not be recorded: {}",
                                    retest.instrument, e
                                );
                            }
                            self.retest.complete(&retest.instrument);
                        }
                        None => {
                            self.retest.abandon(&retest.instrument);
                            self.guard.release(&retest.instrument);
                            self.audit.record(AuditEvent::RetestAbandoned {
                                instrument: retest.instrument,
                                reason: "entry order submission failed".to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Place a market entry and build the resulting position from the
    /// actual fill. Returns `None` after exhausting retries; an auth
    /// failure additionally suspends all further entries.
    async fn submit_entry(
        &self,
        instrument: &str,
        direction: Direction,
        quantity: Decimal,
        stop_loss: Decimal,
        target: Decimal,
    ) -> Option<Position> {
        let request = OrderRequest::entry(instrument, direction, quantity);
        let timeout = Duration::from_millis(self.cfg.monitor.order_timeout_ms);

        let result = self
            .retry
            .run("entry order", OrderError::is_transient, || {
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
                info!(
                    "opened {} {} x{} @ {} (order {})",
                    direction, instrument, ack.filled_quantity, ack.fill_price, ack.order_id
                );
                self.audit.record(AuditEvent::PositionOpened {
                    instrument: instrument.to_string(),
                    direction,
                    entry_price: ack.fill_price,
                    quantity: ack.filled_quantity,
                    order_id: ack.order_id.clone(),
                });
                Some(Position {
                    instrument: instrument.to_string(),
                    direction,
                    entry_price: ack.fill_price,
                    quantity: ack.filled_quantity,
                    stop_loss,
                    target,
                    breakeven_moved: false,
                    peak_favorable_price: ack.fill_price,
                    order_id: ack.order_id,
                    opened_at: Utc::now(),
                })
            }
            Err(e) => {
                if e.is_auth() {
                    self.suspend_orders(&e.to_string());
                }
                warn!("entry order for {} failed: {}", instrument, e);
                self.audit.record(AuditEvent::OrderFailed {
                    instrument: instrument.to_string(),
                    correlation_id: request.correlation_id.to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Auth failures stop new entries but never the exit monitoring that
    /// protects existing positions.
    fn suspend_orders(&self, reason: &str) {
        if !self.orders_suspended.swap(true, Ordering::SeqCst) {
            error!(
                "suspending new order placement: {}; exit monitoring continues",
                reason
            );
            self.audit.record(AuditEvent::OrdersSuspended {
                reason: reason.to_string(),
            });
        }
    }

    /// Share of tracked instruments whose last close sits above their
    /// reference average. `None` until any instrument has enough bars.
    fn market_breadth(&self) -> Option<f64> {
        let period = self.cfg.screening.trend_period;
        let mut counted = 0u32;
        let mut above = 0u32;
        for instrument in &self.cfg.instruments {
            let bars = self.candles.snapshot(instrument);
            if bars.len() < period {
                continue;
            }
            let sma = match self
                .indicators
                .compute(&bars, &IndicatorRequest::new(IndicatorKind::Sma, period))
            {
                Ok(values) => values,
                Err(_) => continue,
            };
            let avg = match sma.last() {
                Some(v) if v.is_finite() => *v,
                _ => continue,
            };
            let close = match bars.last().and_then(|b| b.close.to_f64()) {
                Some(c) if c.is_finite() => c,
                _ => continue,
            };
            counted += 1;
            if close > avg {
                above += 1;
            }
        }
        if counted == 0 {
            None
        } else {
            Some(above as f64 / counted as f64)
        }
    }

    fn position_size(&self, signal: &Signal) -> Option<Decimal> {
        let risk = signal.risk_per_unit();
        if risk <= Decimal::ZERO {
            return None;
        }
        let quantity = (self.cfg.sizing.risk_per_trade / risk).round_dp(2);
        if quantity <= Decimal::ZERO {
            return None;
        }
        Some(quantity.min(self.cfg.sizing.max_quantity))
    }
}

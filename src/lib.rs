pub mod audit;
pub mod candles;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod indicators;
pub mod ledger;
pub mod monitor;
pub mod reconcile;
pub mod retest;
pub mod retry;
pub mod screening;
pub mod strategy;

pub use audit::{AuditEvent, AuditSink};
pub use candles::{CandleAggregator, CandleConfig};
pub use config::EngineConfig;
pub use domain::{
    Bar, Direction, PendingRetest, Position, ScreeningVerdict, Signal, Tick, VenuePosition,
};
pub use engine::{EngineSnapshot, EngineState, EngineSupervisor, ExposureGuard};
pub use error::{EngineError, FeedError, OrderError, Result};
pub use feed::{HistoryBar, MarketFeed, SimFeed, SimFeedConfig};
pub use gateway::{OrderGateway, PaperGateway};
pub use indicators::{IndicatorLibrary, StdIndicators};
pub use ledger::PositionLedger;
pub use monitor::PositionMonitor;
pub use reconcile::ReconciliationService;
pub use retest::RetestWaitQueue;
pub use retry::RetryPolicy;
pub use screening::ScreeningPipeline;
pub use strategy::StrategyRouter;

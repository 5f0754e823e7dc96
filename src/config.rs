use crate::candles::CandleConfig;
use crate::error::{EngineError, Result};
use crate::monitor::MonitorConfig;
use crate::reconcile::ReconcileConfig;
use crate::retest::RetestConfig;
use crate::retry::RetryPolicy;
use crate::screening::levels::ScreeningSettings;
use crate::strategy::{BlackoutWindow, RouterConfig};
use chrono::NaiveTime;
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Instruments the engine trades. Empty is a fatal startup error.
    pub instruments: Vec<String>,
    #[serde(default)]
    pub candles: CandlesSection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub screening: ScreeningSection,
    #[serde(default)]
    pub sizing: SizingSection,
    #[serde(default)]
    pub retest: RetestSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandlesSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: i64,
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// How often buffered ticks are refolded into bars.
    #[serde(default = "default_rebuild_ms")]
    pub rebuild_ms: u64,
}

fn default_interval_secs() -> i64 {
    60
}
fn default_ring_capacity() -> usize {
    5_000
}
fn default_rebuild_ms() -> u64 {
    1_000
}

impl Default for CandlesSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            ring_capacity: default_ring_capacity(),
            rebuild_ms: default_rebuild_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_regime_period")]
    pub regime_period: usize,
    /// Trend strength (0-100) at or above which the breakout generator
    /// runs instead of mean reversion.
    #[serde(default = "default_regime_threshold")]
    pub regime_threshold: f64,
    #[serde(default = "default_min_history")]
    pub min_history: usize,
    /// Daily no-trade windows, "HH:MM" pairs. May wrap midnight.
    #[serde(default)]
    pub blackout: Vec<BlackoutSection>,
}

fn default_regime_period() -> usize {
    10
}
fn default_regime_threshold() -> f64 {
    40.0
}
fn default_min_history() -> usize {
    30
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            regime_period: default_regime_period(),
            regime_threshold: default_regime_threshold(),
            min_history: default_min_history(),
            blackout: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlackoutSection {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreeningSection {
    /// Advisory level internal errors pass when true, block when false.
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    #[serde(default)]
    pub disabled_levels: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_max_total_risk")]
    pub max_total_risk: Decimal,
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: Decimal,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
    #[serde(default = "default_trend_period")]
    pub trend_period: usize,
    #[serde(default = "default_max_band_width_pct")]
    pub max_band_width_pct: f64,
    #[serde(default = "default_max_gap_pct")]
    pub max_gap_pct: Decimal,
    #[serde(default = "default_compression_period")]
    pub compression_period: usize,
    #[serde(default = "default_max_range_expansion")]
    pub max_range_expansion: f64,
    #[serde(default = "default_confluence_lookback")]
    pub confluence_lookback: usize,
    #[serde(default = "default_min_headroom_pct")]
    pub min_headroom_pct: Decimal,
    #[serde(default = "default_min_breadth_long")]
    pub min_breadth_long: f64,
    #[serde(default = "default_max_breadth_short")]
    pub max_breadth_short: f64,
    #[serde(default = "default_min_heuristic_score")]
    pub min_heuristic_score: f64,
    #[serde(default = "default_max_entry_extension_pct")]
    pub max_entry_extension_pct: Decimal,
}

fn default_fail_open() -> bool {
    true
}
fn default_max_open_positions() -> usize {
    5
}
fn default_max_total_risk() -> Decimal {
    dec!(5000)
}
fn default_min_risk_reward() -> Decimal {
    dec!(1.5)
}
fn default_min_confidence() -> u8 {
    40
}
fn default_trend_period() -> usize {
    20
}
fn default_max_band_width_pct() -> f64 {
    6.0
}
fn default_max_gap_pct() -> Decimal {
    dec!(0.01)
}
fn default_compression_period() -> usize {
    20
}
fn default_max_range_expansion() -> f64 {
    2.5
}
fn default_confluence_lookback() -> usize {
    50
}
fn default_min_headroom_pct() -> Decimal {
    dec!(0.005)
}
fn default_min_breadth_long() -> f64 {
    0.35
}
fn default_max_breadth_short() -> f64 {
    0.65
}
fn default_min_heuristic_score() -> f64 {
    45.0
}
fn default_max_entry_extension_pct() -> Decimal {
    dec!(0.005)
}

impl Default for ScreeningSection {
    fn default() -> Self {
        Self {
            fail_open: default_fail_open(),
            disabled_levels: Vec::new(),
            blacklist: Vec::new(),
            max_open_positions: default_max_open_positions(),
            max_total_risk: default_max_total_risk(),
            min_risk_reward: default_min_risk_reward(),
            min_confidence: default_min_confidence(),
            trend_period: default_trend_period(),
            max_band_width_pct: default_max_band_width_pct(),
            max_gap_pct: default_max_gap_pct(),
            compression_period: default_compression_period(),
            max_range_expansion: default_max_range_expansion(),
            confluence_lookback: default_confluence_lookback(),
            min_headroom_pct: default_min_headroom_pct(),
            min_breadth_long: default_min_breadth_long(),
            max_breadth_short: default_max_breadth_short(),
            min_heuristic_score: default_min_heuristic_score(),
            max_entry_extension_pct: default_max_entry_extension_pct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizingSection {
    /// Account currency risked per trade; quantity = risk / stop distance.
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: Decimal,
    #[serde(default = "default_max_quantity")]
    pub max_quantity: Decimal,
}

fn default_risk_per_trade() -> Decimal {
    dec!(100)
}
fn default_max_quantity() -> Decimal {
    dec!(100)
}

impl Default for SizingSection {
    fn default() -> Self {
        Self {
            risk_per_trade: default_risk_per_trade(),
            max_quantity: default_max_quantity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetestSection {
    #[serde(default = "default_tolerance_pct")]
    pub tolerance_pct: Decimal,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
    #[serde(default = "default_retest_poll_ms")]
    pub poll_ms: u64,
}

fn default_tolerance_pct() -> Decimal {
    dec!(0.004)
}
fn default_ttl_minutes() -> i64 {
    30
}
fn default_retest_poll_ms() -> u64 {
    1_000
}

impl Default for RetestSection {
    fn default() -> Self {
        Self {
            tolerance_pct: default_tolerance_pct(),
            ttl_minutes: default_ttl_minutes(),
            poll_ms: default_retest_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_monitor_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_breakeven_rr")]
    pub breakeven_rr: Decimal,
    #[serde(default = "default_trail_fraction")]
    pub trail_fraction: Decimal,
    /// "HH:MM" or "HH:MM:SS", UTC.
    #[serde(default = "default_session_end")]
    pub session_end: String,
    #[serde(default = "default_flatten_lead_minutes")]
    pub flatten_lead_minutes: i64,
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,
}

fn default_monitor_poll_ms() -> u64 {
    500
}
fn default_breakeven_rr() -> Decimal {
    Decimal::ONE
}
fn default_trail_fraction() -> Decimal {
    dec!(0.5)
}
fn default_session_end() -> String {
    "21:45".to_string()
}
fn default_flatten_lead_minutes() -> i64 {
    15
}
fn default_order_timeout_ms() -> u64 {
    5_000
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_ms: default_monitor_poll_ms(),
            breakeven_rr: default_breakeven_rr(),
            trail_fraction: default_trail_fraction(),
            session_end: default_session_end(),
            flatten_lead_minutes: default_flatten_lead_minutes(),
            order_timeout_ms: default_order_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileSection {
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_reconcile_interval_secs() -> u64 {
    60
}
fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_strategy_interval_secs")]
    pub strategy_interval_secs: u64,
    /// Historical bars fetched per instrument at startup.
    #[serde(default = "default_history_bars")]
    pub history_bars: usize,
    #[serde(default = "default_feed_timeout_ms")]
    pub feed_timeout_ms: u64,
    #[serde(default = "default_audit_buffer")]
    pub audit_buffer: usize,
}

fn default_strategy_interval_secs() -> u64 {
    5
}
fn default_history_bars() -> usize {
    120
}
fn default_feed_timeout_ms() -> u64 {
    10_000
}
fn default_audit_buffer() -> usize {
    1_024
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            strategy_interval_secs: default_strategy_interval_secs(),
            history_bars: default_history_bars(),
            feed_timeout_ms: default_feed_timeout_ms(),
            audit_buffer: default_audit_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Optional log file directory; daily-rolling when set.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("WINDLASS_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (WINDLASS_MONITOR__POLL_MS, etc.)
            .add_source(
                Environment::with_prefix("WINDLASS")
                    .separator("__")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Configuration for paper runs with no files on disk.
    pub fn paper_defaults(instruments: Vec<String>) -> Self {
        Self {
            instruments,
            candles: CandlesSection::default(),
            router: RouterSection::default(),
            screening: ScreeningSection::default(),
            sizing: SizingSection::default(),
            retest: RetestSection::default(),
            monitor: MonitorSection::default(),
            reconcile: ReconcileSection::default(),
            retry: RetrySection::default(),
            engine: EngineSection::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.instruments.is_empty() {
            errors.push("instruments must not be empty".to_string());
        }

        if self.candles.interval_secs <= 0 {
            errors.push("candles.interval_secs must be positive".to_string());
        }
        if self.candles.ring_capacity == 0 {
            errors.push("candles.ring_capacity must be positive".to_string());
        }

        if !(0.0..=100.0).contains(&self.router.regime_threshold) {
            errors.push("router.regime_threshold must be within 0-100".to_string());
        }
        for window in &self.router.blackout {
            if parse_time(&window.start).is_err() || parse_time(&window.end).is_err() {
                errors.push(format!(
                    "invalid blackout window {}-{}",
                    window.start, window.end
                ));
            }
        }

        if self.retest.tolerance_pct <= Decimal::ZERO || self.retest.tolerance_pct > dec!(0.05) {
            errors.push("retest.tolerance_pct must be in (0, 0.05]".to_string());
        }
        if self.retest.ttl_minutes <= 0 {
            errors.push("retest.ttl_minutes must be positive".to_string());
        }

        if self.monitor.breakeven_rr <= Decimal::ZERO {
            errors.push("monitor.breakeven_rr must be positive".to_string());
        }
        if self.monitor.trail_fraction <= Decimal::ZERO || self.monitor.trail_fraction >= Decimal::ONE
        {
            errors.push("monitor.trail_fraction must be in (0, 1)".to_string());
        }
        if parse_time(&self.monitor.session_end).is_err() {
            errors.push(format!(
                "monitor.session_end '{}' is not a valid time",
                self.monitor.session_end
            ));
        }
        if self.monitor.flatten_lead_minutes < 0 {
            errors.push("monitor.flatten_lead_minutes must not be negative".to_string());
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.sizing.risk_per_trade <= Decimal::ZERO {
            errors.push("sizing.risk_per_trade must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn candle_config(&self) -> CandleConfig {
        CandleConfig {
            interval_secs: self.candles.interval_secs,
            ring_capacity: self.candles.ring_capacity,
        }
    }

    pub fn router_config(&self) -> Result<RouterConfig> {
        let mut blackout = Vec::with_capacity(self.router.blackout.len());
        for window in &self.router.blackout {
            blackout.push(BlackoutWindow {
                start: parse_time(&window.start)?,
                end: parse_time(&window.end)?,
            });
        }
        Ok(RouterConfig {
            regime_period: self.router.regime_period,
            regime_threshold: self.router.regime_threshold,
            min_history: self.router.min_history,
            blackout,
        })
    }

    pub fn screening_settings(&self) -> ScreeningSettings {
        ScreeningSettings {
            blacklist: self.screening.blacklist.iter().cloned().collect(),
            max_open_positions: self.screening.max_open_positions,
            max_total_risk: self.screening.max_total_risk,
            min_risk_reward: self.screening.min_risk_reward,
            min_confidence: self.screening.min_confidence,
            trend_period: self.screening.trend_period,
            max_band_width_pct: self.screening.max_band_width_pct,
            max_gap_pct: self.screening.max_gap_pct,
            compression_period: self.screening.compression_period,
            max_range_expansion: self.screening.max_range_expansion,
            confluence_lookback: self.screening.confluence_lookback,
            min_headroom_pct: self.screening.min_headroom_pct,
            min_breadth_long: self.screening.min_breadth_long,
            max_breadth_short: self.screening.max_breadth_short,
            min_heuristic_score: self.screening.min_heuristic_score,
            max_entry_extension_pct: self.screening.max_entry_extension_pct,
        }
    }

    pub fn disabled_levels(&self) -> HashSet<String> {
        self.screening.disabled_levels.iter().cloned().collect()
    }

    pub fn retest_config(&self) -> RetestConfig {
        RetestConfig {
            tolerance_pct: self.retest.tolerance_pct,
        }
    }

    pub fn monitor_config(&self) -> Result<MonitorConfig> {
        Ok(MonitorConfig {
            poll_ms: self.monitor.poll_ms,
            breakeven_rr: self.monitor.breakeven_rr,
            trail_fraction: self.monitor.trail_fraction,
            session_end: parse_time(&self.monitor.session_end)?,
            flatten_lead_minutes: self.monitor.flatten_lead_minutes,
            order_timeout_ms: self.monitor.order_timeout_ms,
        })
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            interval_secs: self.reconcile.interval_secs,
            fetch_timeout_ms: self.reconcile.fetch_timeout_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.retry.max_delay_ms,
        )
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| EngineError::InvalidConfig(format!("'{}' is not a valid HH:MM time", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_defaults_validate() {
        let cfg = EngineConfig::paper_defaults(vec!["ES".to_string()]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_instruments_fail_validation() {
        let cfg = EngineConfig::paper_defaults(Vec::new());
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("instruments")));
    }

    #[test]
    fn bad_session_end_is_reported() {
        let mut cfg = EngineConfig::paper_defaults(vec!["ES".to_string()]);
        cfg.monitor.session_end = "25:99".to_string();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("session_end")));
    }

    #[test]
    fn blackout_windows_parse_into_router_config() {
        let mut cfg = EngineConfig::paper_defaults(vec!["ES".to_string()]);
        cfg.router.blackout = vec![BlackoutSection {
            start: "12:00".to_string(),
            end: "13:30".to_string(),
        }];
        let router = cfg.router_config().unwrap();
        assert_eq!(router.blackout.len(), 1);
        assert_eq!(
            router.blackout[0].start,
            NaiveTime::from_hms_opt(12, 0, 0).unwrap()
        );
    }

    #[test]
    fn session_end_accepts_both_time_formats() {
        assert!(parse_time("21:45").is_ok());
        assert!(parse_time("21:45:30").is_ok());
        assert!(parse_time("midnight").is_err());
    }
}

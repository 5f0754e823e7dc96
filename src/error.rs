use thiserror::Error;

/// Main error type for the execution engine
#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Market data errors
    #[error("Market feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Insufficient bar history for {instrument}: have {have}, need {need}")]
    InsufficientHistory {
        instrument: String,
        have: usize,
        need: usize,
    },

    #[error("Indicator error: {0}")]
    Indicator(String),

    // Order execution errors
    #[error("Order gateway error: {0}")]
    Order(#[from] OrderError),

    // Screening / risk errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Specific error types for the market data feed
#[derive(Error, Debug, Clone)]
pub enum FeedError {
    #[error("Feed disconnected: {0}")]
    Disconnected(String),

    #[error("Feed timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Subscription failed: {0}")]
    Subscription(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("History unavailable for {instrument}: {reason}")]
    HistoryUnavailable { instrument: String, reason: String },
}

impl FeedError {
    /// Disconnects and timeouts are expected under flaky networks and are
    /// handled with reconnect/backoff rather than surfaced as failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Disconnected(_) | FeedError::Timeout { .. })
    }
}

/// Specific error types for order placement
#[derive(Error, Debug, Clone)]
pub enum OrderError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Order timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Venue authentication failed: {0}")]
    Auth(String),

    #[error("Gateway disconnected: {0}")]
    Disconnected(String),

    #[error("Duplicate order for correlation id {correlation_id}")]
    Duplicate { correlation_id: String },
}

impl OrderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrderError::Timeout { .. } | OrderError::RateLimited(_) | OrderError::Disconnected(_)
        )
    }

    /// Auth failures escalate to the supervisor and suspend new entries.
    pub fn is_auth(&self) -> bool {
        matches!(self, OrderError::Auth(_))
    }
}

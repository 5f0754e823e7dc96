use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use windlass::config::LoggingConfig;
use windlass::error::Result;
use windlass::feed::{SimFeed, SimFeedConfig};
use windlass::gateway::PaperGateway;
use windlass::indicators::StdIndicators;
use windlass::{CandleAggregator, EngineConfig, EngineSupervisor};

#[derive(Parser)]
#[command(name = "windlass", about = "Regime-aware intraday trading execution engine")]
struct Cli {
    /// Configuration directory (default.toml + env-specific overrides)
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against the simulated feed and paper gateway
    Paper {
        /// Instruments to trade, overriding the configured list
        #[arg(long, value_delimiter = ',')]
        instruments: Option<Vec<String>>,
        /// Seed for the simulated price walk
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
    /// Load and validate the configuration, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            init_logging_simple();
            let cfg = EngineConfig::load_from(&cli.config_dir)?;
            match cfg.validate() {
                Ok(()) => {
                    println!(
                        "configuration ok: {} instrument(s), session end {}",
                        cfg.instruments.len(),
                        cfg.monitor.session_end
                    );
                    Ok(())
                }
                Err(errors) => {
                    for e in &errors {
                        eprintln!("config error: {}", e);
                    }
                    Err(windlass::EngineError::InvalidConfig(errors.join("; ")))
                }
            }
        }
        Commands::Paper { instruments, seed } => {
            let mut cfg = EngineConfig::load_from(&cli.config_dir)
                .unwrap_or_else(|_| EngineConfig::paper_defaults(vec!["ES".to_string()]));
            if let Some(instruments) = instruments {
                cfg.instruments = instruments;
            }
            init_logging(&cfg.logging);
            run_paper(cfg, seed).await
        }
    }
}

async fn run_paper(cfg: EngineConfig, seed: u64) -> Result<()> {
    let feed = Arc::new(SimFeed::new(SimFeedConfig {
        seed,
        ..SimFeedConfig::default()
    }));
    // The paper gateway marks fills off the same aggregator the engine
    // builds bars in, so paper fills track the simulated tape.
    let candles = Arc::new(CandleAggregator::new(cfg.candle_config()));
    let gateway = Arc::new(PaperGateway::new(candles.clone()));

    let engine = EngineSupervisor::new(cfg, candles, feed, gateway, Arc::new(StdIndicators))?;
    engine.start().await?;

    shutdown_signal().await;
    info!("shutdown signal received");
    engine.stop().await;

    let snapshot = engine.status();
    info!(
        "final state {}: {} open position(s), {} pending retest(s), {} audit event(s) dropped",
        snapshot.state,
        snapshot.open_positions.len(),
        snapshot.pending_retests.len(),
        snapshot.audit_events_dropped
    );
    Ok(())
}

fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},windlass=debug", cfg.level)));

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial log file, so writability is preflighted first.
    let file_layer = cfg.directory.as_deref().and_then(|log_dir| {
        if std::fs::create_dir_all(log_dir).is_err() {
            eprintln!(
                "warning: could not create log directory {}, file logging disabled",
                log_dir
            );
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".windlass_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "windlass.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Keep the guard alive for the life of the process.
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "warning: could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let console_layer = if cfg.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

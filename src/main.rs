use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kestrel::analytics::{compute_metrics, save_report};
use kestrel::broker::rest::RestBrokerClient;
use kestrel::broker::{MarketData, OrderGateway, PositionQuery};
use kestrel::config::EngineConfig;
use kestrel::core::EngineError;
use kestrel::ledger::reconciler::Reconciler;
use kestrel::ledger::TradeLedger;
use kestrel::model::{DirectionFilter, LinearDirectionModel};
use kestrel::notify::{LogNotifier, Notifier, TelegramNotifier};
use kestrel::trading::{retry_with_backoff, OrderOrchestrator, RetryPolicy};
use kestrel::wallet::CapitalLedger;

/// Decision-cycle service: one tick walks every configured instrument
/// through fetch -> evaluate -> gate -> size -> submit. On shutdown it
/// settles the session against the wallet and writes the session report.
struct TradingEngine {
    orchestrator: OrderOrchestrator,
    market: Arc<dyn MarketData>,
    ledger: Arc<Mutex<TradeLedger>>,
    instruments: Vec<String>,
    bar_count: usize,
    cycle_interval: Duration,
    retry: RetryPolicy,
    results_dir: PathBuf,
}

impl TradingEngine {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let session_started = Utc::now();
        match self.orchestrator.open_session() {
            Ok(()) => info!(
                session_balance = self.orchestrator.wallet().session_balance(),
                "trading session opened"
            ),
            Err(EngineError::SessionAlreadyOpen) => warn!(
                session_balance = self.orchestrator.wallet().session_balance(),
                "resuming previously open session"
            ),
            Err(e) => return Err(e.into()),
        }

        let mut ticker = tokio::time::interval(self.cycle_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for instrument in self.instruments.clone() {
                        if let Err(e) = self.run_instrument(&instrument).await {
                            error!(instrument = %instrument, error = %e, "decision cycle failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("trading engine shutting down");
                    return self.finalize(session_started).await;
                }
            }
        }
    }

    async fn run_instrument(&mut self, instrument: &str) -> Result<()> {
        let market = Arc::clone(&self.market);
        let count = self.bar_count;
        let bars = retry_with_backoff(&self.retry, "bar fetch", || {
            let market = Arc::clone(&market);
            let instrument = instrument.to_string();
            async move { market.fetch_bars(&instrument, count).await }
        })
        .await?;

        let outcome = self.orchestrator.run_cycle(&bars).await?;
        tracing::debug!(instrument, outcome = ?outcome, "decision cycle complete");
        Ok(())
    }

    /// Settles realized P&L from this session's rows back into the wallet
    /// and writes the performance report.
    async fn finalize(mut self, session_started: DateTime<Utc>) -> Result<()> {
        let rows = self.ledger.lock().await.load_rows()?;
        let session_pnl: f64 = rows
            .iter()
            .filter(|r| r.time >= session_started)
            .map(|r| r.profit)
            .sum();
        let wallet_balance = self.orchestrator.settle_session(session_pnl)?;

        let report = compute_metrics(&rows);
        let report_path = save_report(&report, &self.results_dir)?;

        let stats = self.orchestrator.stats();
        info!(
            wallet_balance,
            session_pnl,
            cycles = stats.cycles,
            filled = stats.filled,
            rejected_by_filter = stats.rejected_by_filter,
            rejected_by_broker = stats.rejected_by_broker,
            report = %report_path.display(),
            "session settled"
        );
        Ok(())
    }
}

fn init_tracing(log_dir: &str) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "kestrel.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .json()
        .with_current_span(false)
        .with_span_list(true);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Keep the appender alive for the life of the process.
    std::mem::forget(guard);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "kestrel.toml".to_string());
    let config = EngineConfig::load_from_file(&config_path)
        .with_context(|| format!("loading config from {config_path}"))?;

    init_tracing(&config.paths.log_dir)?;
    info!(config = %config_path, "kestrel trading engine starting");

    let api_token = std::env::var(&config.broker.api_token_env)
        .with_context(|| format!("missing {} in environment", config.broker.api_token_env))?;
    let broker = Arc::new(RestBrokerClient::new(
        config.broker.api_url.clone(),
        config.broker.account_id.clone(),
        api_token,
    )?);

    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(telegram) => match std::env::var(&telegram.bot_token_env) {
            Ok(token) => match TelegramNotifier::new(token, telegram.chat_id.clone()) {
                Ok(telegram_notifier) => Arc::new(telegram_notifier),
                Err(e) => {
                    warn!(error = %e, "telegram client init failed, alerts go to the log");
                    Arc::new(LogNotifier)
                }
            },
            Err(_) => {
                warn!(env = %telegram.bot_token_env, "telegram token not set, alerts go to the log");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    };

    // A missing or malformed model artifact is the degraded mode: the
    // engine runs with the confirmation gate closed, it never bypasses it.
    let filter: Option<Arc<dyn DirectionFilter>> =
        match LinearDirectionModel::load(Path::new(&config.paths.model_file)) {
            Ok(model) => Some(Arc::new(model)),
            Err(e) => {
                warn!(error = %e, "running without a direction model");
                None
            }
        };

    let wallet = CapitalLedger::load(
        Path::new(&config.paths.wallet_file),
        config.risk.initial_wallet_balance,
    )?;
    let ledger = Arc::new(Mutex::new(TradeLedger::new(Path::new(
        &config.paths.ledger_file,
    ))));

    let retry = RetryPolicy::from(&config.retry);
    let orchestrator = OrderOrchestrator::new(
        config.strategy.clone(),
        config.risk.clone(),
        retry.clone(),
        Arc::clone(&broker) as Arc<dyn OrderGateway>,
        filter,
        Arc::clone(&ledger),
        notifier,
        wallet,
    );

    let engine = TradingEngine {
        orchestrator,
        market: Arc::clone(&broker) as Arc<dyn MarketData>,
        ledger: Arc::clone(&ledger),
        instruments: config.trading.instruments.clone(),
        bar_count: config.trading.bar_count,
        cycle_interval: Duration::from_secs(config.trading.cycle_interval_secs),
        retry,
        results_dir: PathBuf::from(&config.paths.results_dir),
    };

    let (shutdown_tx, _) = broadcast::channel(16);
    let mut tasks: Vec<JoinHandle<Result<()>>> = Vec::new();

    let engine_shutdown = shutdown_tx.subscribe();
    tasks.push(tokio::spawn(async move { engine.run(engine_shutdown).await }));

    let mut reconciler = Reconciler::new(
        Arc::clone(&ledger),
        Arc::clone(&broker) as Arc<dyn PositionQuery>,
    );
    let reconcile_shutdown = shutdown_tx.subscribe();
    let reconcile_interval = Duration::from_secs(config.trading.reconcile_interval_secs);
    tasks.push(tokio::spawn(async move {
        reconciler
            .run(reconcile_interval, reconcile_shutdown)
            .await
            .map_err(anyhow::Error::from)
    }));

    info!("engine running, press Ctrl+C to stop");
    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
    let _ = shutdown_tx.send(());

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "service error during shutdown"),
            Err(e) => error!(error = %e, "service task failed"),
        }
    }

    info!("shutdown complete");
    Ok(())
}

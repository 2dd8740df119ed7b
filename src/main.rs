mod config;
mod driver;
mod error;
mod format;
mod model;
mod notifier;
mod source;
mod watch;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, NotifierConfig};
use driver::poll::Poller;
use driver::stream::Streamer;
use error::{ConfigError, DriverError};
use model::StreamEvent;
use notifier::{Notifier, deliver};
use notifier::telegram::TelegramNotifier;
use notifier::terminal::TerminalNotifier;
use source::TradeStream;
use source::alcor::AlcorMarkets;
use source::binance::Binance;
use source::wax::WaxPools;
use watch::NotificationGate;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("price source error")]
    Source,
    #[display("driver failed")]
    Driver,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "price-watch", about = "Crypto price-movement chat notifier")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    // Credentials may live in a local .env file
    let _ = dotenv::dotenv();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    let gate = NotificationGate::new(config.general.stale_after_secs);
    let timeout = Duration::from_secs(config.general.request_timeout_secs);
    info!(
        stale_after_secs = gate.stale_after().num_seconds(),
        request_timeout_secs = timeout.as_secs(),
        "price-watch starting"
    );

    let cancel = CancellationToken::new();
    let mut drivers: JoinSet<Result<(), Report<DriverError>>> = JoinSet::new();
    let mut background = Vec::new();
    // Kept for reporting a driver that died without a chance to report itself
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    // ── Polling driver ────────────────────────────────────────────────────────
    if let Some(poller_config) = config.poller.as_ref().filter(|p| p.enabled) {
        let sources = &config.sources;
        let market = Arc::new(
            AlcorMarkets::new(&sources.alcor_url, timeout).change_context(AppError::Source)?,
        );
        let pools = Arc::new(
            WaxPools::new(&sources.wax_chain_url, &sources.amm_contract, timeout)
                .change_context(AppError::Source)?,
        );
        let notifier = build_notifier(&poller_config.notifier, "poller", timeout)
            .change_context(AppError::Config)?;

        notifiers.push(notifier.clone());
        let poller = Poller::new(poller_config, gate, market, pools, notifier);
        drivers.spawn(poller.run(cancel.clone()));
    }

    // ── Push driver ───────────────────────────────────────────────────────────
    if let Some(streamer_config) = config.streamer.as_ref().filter(|s| s.enabled) {
        let sources = &config.sources;
        let binance = Arc::new(
            Binance::new(
                &sources.binance_rest_url,
                &sources.binance_ws_url,
                streamer_config.subscription_id,
                timeout,
            )
            .change_context(AppError::Source)?,
        );
        let notifier = build_notifier(&streamer_config.notifier, "streamer", timeout)
            .change_context(AppError::Config)?;

        notifiers.push(notifier.clone());
        let streamer = Streamer::new(streamer_config, gate, binance.clone(), notifier);
        let symbols = streamer.symbols();
        let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(1024);

        let stream_cancel = cancel.clone();
        background.push(tokio::spawn(async move {
            if let Err(e) = binance.stream_trades(&symbols, event_tx, stream_cancel).await {
                tracing::error!(error = ?e, "trade stream failed");
            }
        }));
        drivers.spawn(streamer.run(event_rx, cancel.clone()));
    }

    if drivers.is_empty() {
        tracing::warn!("no drivers enabled; nothing to do");
        return Ok(());
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("ctrl+c received, shutting down");
                Ok(())
            }
            Err(e) => Err(Report::new(e).change_context(AppError::Runtime)),
        },
        Some(joined) = drivers.join_next() => settle_driver(joined, &notifiers).await,
    };

    cancel.cancel();

    // Drivers send their final notification on the way out
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while drivers.join_next().await.is_some() {}
    })
    .await;
    for handle in background {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("shutdown complete");
    outcome
}

/// Outcome of the first driver to finish.
///
/// A driver that returned an error has already told the operator; a task
/// that panicked or was aborted has not, so the fatal message goes out here.
async fn settle_driver(
    joined: Result<Result<(), Report<DriverError>>, JoinError>,
    notifiers: &[Arc<dyn Notifier>],
) -> Result<(), Report<AppError>> {
    match joined {
        Ok(Ok(())) => {
            info!("driver finished, shutting down");
            Ok(())
        }
        Ok(Err(report)) => Err(report.change_context(AppError::Driver)),
        Err(join_error) => {
            let report = Report::new(join_error).change_context(AppError::Runtime);
            tracing::error!(error = ?report, "driver task died");
            let text = format::fatal(&format!("{report:?}"));
            for notifier in notifiers {
                deliver(notifier.as_ref(), &text).await;
            }
            Err(report)
        }
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn build_notifier(
    config: &NotifierConfig,
    channel: &str,
    timeout: Duration,
) -> Result<Arc<dyn Notifier>, Report<ConfigError>> {
    match config {
        NotifierConfig::Terminal => Ok(Arc::new(TerminalNotifier::new(channel))),
        NotifierConfig::Telegram {
            chat_id_env,
            token_env,
            api_url,
        } => {
            let chat_id = config::require_env(chat_id_env)?;
            let token = config::require_env(token_env)?;
            let notifier = TelegramNotifier::new(api_url, &token, chat_id, timeout)
                .change_context(ConfigError::Validation {
                    field: format!("{channel}.notifier"),
                })?;
            Ok(Arc::new(notifier))
        }
    }
}

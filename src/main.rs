use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use pricewatch::AppConfig;
use pricewatch::config::LoggingConfig;
use pricewatch::core::{
    AlertLog, ConcurrencyGate, MonitorContext, NotificationQueue, NotificationSettings,
    Orchestrator, PriceLedger, RateLimitMarker,
};
use pricewatch::plugins::{Mailer, PriceFetcher, PriceParser, SmtpMailer};
use pricewatch::scraper::WebScraper;
use pricewatch::utils::network::ensure_online;

#[derive(Debug, Parser)]
#[command(
    name = "pricewatch",
    version,
    about = "Watches product pages and alerts on price changes"
)]
struct Cli {
    /// Extra configuration file layered over config/default
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Start even if the reachability probe fails
    #[arg(long)]
    skip_network_check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Invalid configuration")?;
    let _log_guard = init_tracing(&config.logging)?;

    info!("Starting pricewatch...");

    if cli.skip_network_check {
        tracing::warn!("Skipping network reachability check");
    } else {
        ensure_online(&config.network.probe_address, config.network.probe_timeout())
            .await
            .context("No internet connection, refusing to start")?;
    }

    let scraper = WebScraper::new(config.scraper.clone())?;
    match scraper.browser_version() {
        Ok(version) => info!(%version, "Browser launched"),
        Err(e) => tracing::warn!("Browser launched, version unknown: {}", e),
    }

    let mailer: Option<Arc<dyn Mailer>> = if config.email.enabled {
        Some(Arc::new(SmtpMailer::new(&config.email)?))
    } else {
        info!("Email notifications disabled");
        None
    };

    let notifications = Arc::new(
        NotificationQueue::new(
            NotificationSettings::from_config(&config.email),
            AlertLog::new(&config.storage.alerts_log),
            RateLimitMarker::new(&config.storage.email_marker_file),
            mailer,
        )
        .await,
    );

    let fetcher: Arc<dyn PriceFetcher> = Arc::new(scraper);
    let ctx = MonitorContext {
        fetcher,
        parser: Arc::new(PriceParser::new()?),
        ledger: Arc::new(PriceLedger::new(&config.storage.prices_file)),
        notifications,
        gate: ConcurrencyGate::new(config.monitor.max_concurrent_fetches),
        check_interval: config.monitor.check_interval(),
    };

    let orchestrator = Orchestrator::new(config.products.clone(), ctx);
    let summary = orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    for stats in &summary.monitors {
        info!(
            product_id = %stats.product_id,
            checked = stats.checked,
            changes = stats.changes,
            skipped = stats.skipped,
            failed = stats.failed,
            "Monitor summary"
        );
    }

    info!("Monitoring stopped by user");
    Ok(())
}

fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},pricewatch={}", config.level, config.level)))
        .context("Invalid logging.level")?;

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "pricewatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

//! perftest CLI
//!
//! Drives load at a target, scrapes its metrics endpoint into the embedded
//! store and writes a chart report when the run ends.
//!
//! ```text
//! perftest run --endpoint http://galeb:8080/ --metrics http://galeb:9090/metrics --duration 5
//! perftest scrape http://galeb:9090/metrics --query 'sum(jvm_memory_bytes_used) by (area)'
//! perftest config --output ~/.config/perftest/config.toml
//! ```
//!
//! `RUST_LOG` overrides the configured log level.

use anyhow::{ensure, Context};
use clap::{Parser, Subcommand};
use perftest::config::{generate_default_config, Config, LoggingConfig};
use perftest::loadgen::{build_client, DnsCache, LoadGenerator, DNS_REFRESH_INTERVAL};
use perftest::query::Evaluator;
use perftest::report::ReportGenerator;
use perftest::scrape::{HttpFetcher, ScrapeScheduler};
use perftest::storage::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "perftest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Load test a virtual-host router and chart its metrics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate load, scrape metrics and write a report
    Run {
        /// Endpoint to test
        #[arg(long)]
        endpoint: Option<String>,
        /// Metrics endpoint to scrape
        #[arg(long)]
        metrics: Option<String>,
        /// Test duration (in minutes)
        #[arg(long)]
        duration: Option<u64>,
        /// Number of vhosts to test
        #[arg(long)]
        vhosts: Option<usize>,
        /// Number of concurrent request workers
        #[arg(long)]
        parallel: Option<usize>,
        /// Instant query logged after every scrape
        #[arg(long)]
        query: Option<String>,
        /// Parent directory of the report
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Scrape once and print the result as JSON
    Scrape {
        /// Metrics endpoint
        url: String,
        /// Instant query evaluated after ingesting
        #[arg(long)]
        query: Option<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &content)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default(),
    };

    init_logging(&config.logging);

    match cli.command {
        Commands::Run {
            endpoint,
            metrics,
            duration,
            vhosts,
            parallel,
            query,
            output,
        } => {
            if let Some(endpoint) = endpoint {
                config.load.endpoint = endpoint;
            }
            if let Some(metrics) = metrics {
                config.scrape.url = metrics;
            }
            if let Some(duration) = duration {
                config.load.duration_minutes = duration;
            }
            if let Some(vhosts) = vhosts {
                config.load.vhosts = vhosts;
            }
            if let Some(parallel) = parallel {
                config.load.parallel = parallel;
            }
            if query.is_some() {
                config.scrape.query = query;
            }
            if let Some(output) = output {
                config.report.output_dir = output.to_string_lossy().to_string();
            }
            run(config).await
        }
        Commands::Scrape { url, query } => {
            config.scrape.url = url;
            if query.is_some() {
                config.scrape.query = query;
            }
            scrape_once(config).await
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("perftest={}", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Full harness run: scrape loop and load in parallel, then the report
async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    ensure!(!config.load.endpoint.is_empty(), "an endpoint to test is required (--endpoint)");
    ensure!(!config.scrape.url.is_empty(), "a metrics endpoint is required (--metrics)");

    tracing::info!("perftest v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        endpoint = %config.load.endpoint,
        metrics = %config.scrape.url,
        duration_minutes = config.load.duration_minutes,
        vhosts = config.load.vhosts,
        parallel = config.load.parallel,
        "Starting test"
    );

    let store = Arc::new(Store::new(config.store_config()));
    let evaluator = Arc::new(Evaluator::new(Arc::clone(&store), config.engine_config()));

    let fetcher = Arc::new(HttpFetcher::new(
        config.scrape.url.clone(),
        Duration::from_secs(config.scrape.timeout_secs),
    )?);
    let scheduler = Arc::new(ScrapeScheduler::new(
        config.scrape_config(),
        fetcher,
        Arc::clone(&store),
        Arc::clone(&evaluator),
    ));
    let mut scrape_handle = Arc::clone(&scheduler).start();

    let dns = Arc::new(DnsCache::new());
    let (dns_stop_tx, dns_stop_rx) = watch::channel(false);
    let dns_handle = dns.start_refresh(DNS_REFRESH_INTERVAL, dns_stop_rx);
    let client = build_client(
        Arc::clone(&dns),
        Duration::from_secs(config.load.request_timeout_secs),
    )?;
    let generator = LoadGenerator::new(config.load_config(), client)?;
    let running = generator.start();

    let finished_early = tokio::select! {
        _ = tokio::time::sleep(config.duration()) => {
            tracing::info!("Test duration elapsed");
            None
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping early");
            None
        }
        result = &mut scrape_handle => Some(result),
    };

    let summary = running.stop().await;
    dns_stop_tx.send_replace(true);
    let _ = dns_handle.await;

    scheduler.stop();
    let scrape_result = match finished_early {
        Some(result) => result,
        None => scrape_handle.await,
    };
    scrape_result
        .context("scrape task panicked")?
        .context("scrape loop failed")?;

    tracing::info!(%summary, "Load finished");
    tracing::info!("Store: {}", store.stats().await?);

    let report = ReportGenerator::new(Arc::clone(&evaluator), config.report_config())
        .generate()
        .await?;
    println!("Report written to {}", report.directory.display());

    store.close().await?;
    Ok(())
}

/// One scrape tick against an empty store
async fn scrape_once(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(Store::new(config.store_config()));
    let evaluator = Arc::new(Evaluator::new(Arc::clone(&store), config.engine_config()));
    let fetcher = Arc::new(HttpFetcher::new(
        config.scrape.url.clone(),
        Duration::from_secs(config.scrape.timeout_secs),
    )?);

    let scheduler = ScrapeScheduler::new(
        config.scrape_config(),
        fetcher,
        Arc::clone(&store),
        evaluator,
    );
    let report = scheduler.tick().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!("Store: {}", store.stats().await?);
    Ok(())
}

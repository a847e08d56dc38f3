//! cybersec-feeds binary entrypoint.
//! Loads the feed configuration, opens storage and runs the ingestion
//! coordinator until Ctrl-C (or a single pass with `--once`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cybersec_feeds::ingest::config::{self, FeedsConfig};
use cybersec_feeds::ingest::scheduler::cancel_on_signal;
use cybersec_feeds::ingest::{Coordinator, Fetcher, LogSink, Normalizer, Pipeline, SourceRegistry};
use cybersec_feeds::storage::{AssetArea, MarkdownExporter, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "cybersec-feeds", version, about = "Security-news feed ingestion")]
struct Cli {
    /// Config file (TOML or JSON). Defaults to $FEEDS_CONFIG_PATH, then config/feeds.{toml,json}.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run every enabled source once and exit.
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ingest=info,storage=info,warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn load_config(cli: &Cli) -> Result<FeedsConfig> {
    let cfg = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load_default(),
    };
    cfg.context("loading feed configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environment wins.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = load_config(&cli)?;
    let registry = SourceRegistry::from_config(&cfg).context("validating sources")?;
    let sources = registry.list_enabled_sources();
    tracing::info!(
        target: "ingest",
        configured = registry.len(),
        enabled = sources.len(),
        "sources loaded"
    );

    if let Some(listen) = cfg.metrics.listen.as_deref() {
        cybersec_feeds::metrics::install_exporter(listen)?;
    }

    let store = SqliteStore::connect(&cfg.storage.database)
        .await
        .with_context(|| format!("opening database {}", cfg.storage.database.display()))?;
    let fetcher = Fetcher::from_settings(&cfg.ingest)?;
    let assets = AssetArea::new(&cfg.storage.assets_dir);

    let mut pipeline = Pipeline::new(
        fetcher,
        Normalizer::new(cfg.ingest.max_assets_per_item),
        Arc::new(store.clone()),
    )
    .with_assets(assets);
    if let Some(dir) = &cfg.storage.markdown_dir {
        pipeline = pipeline.with_markdown(MarkdownExporter::new(dir, &cfg.storage.assets_dir));
    }

    let coordinator = Coordinator::new(
        sources,
        Arc::new(pipeline),
        Arc::new(LogSink),
        cfg.ingest.max_concurrency,
    );

    if cli.once {
        let outcomes = coordinator.run_once().await;
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        let new: usize = outcomes.iter().map(|o| o.items_new).sum();
        tracing::info!(target: "ingest", sources = outcomes.len(), failed, new, "single pass done");
    } else {
        let shutdown = CancellationToken::new();
        tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), shutdown.clone()));
        coordinator.run(shutdown).await;
    }

    store.close().await;
    Ok(())
}

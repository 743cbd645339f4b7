use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daily_brief::config::Config;
use daily_brief::fetcher::Fetcher;
use daily_brief::orchestrator::FetchOrchestrator;
use daily_brief::payload::{self, Snapshot};
use daily_brief::ranking::{GeminiService, RankingClient, RateGate, Reranker};

#[derive(Debug, Parser)]
#[command(name = "daily-brief", about = "Fetch, rank and snapshot newsletter content")]
struct Cli {
    /// TOML configuration file
    #[arg(long, default_value = "brief.toml")]
    config: PathBuf,

    /// Where the JSON snapshot is written
    #[arg(long, short, default_value = ".cache/newsletter-data.json")]
    output: PathBuf,

    /// Section to leave out of this run (repeatable)
    #[arg(long = "skip")]
    skip: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "daily_brief=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.skip.extend(cli.skip);
    let config = Arc::new(config);

    let today = payload::today(config.timezone_offset_hours);
    info!(
        "{} | edition {}",
        payload::date_string(today),
        payload::edition_number(config.edition_start, today)
    );

    // Ctrl-C stops waiting on slow sources; they fall back to empty sections
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning outstanding fetches");
            on_signal.cancel();
        }
    });

    let mut orchestrator = FetchOrchestrator::new(config.fetch.max_workers);
    if let Some(deadline) = config.deadline() {
        orchestrator = orchestrator.with_deadline(deadline);
    }

    let fetcher = Arc::new(Fetcher::new(config.clone()));
    let mut sections = orchestrator
        .run(fetcher.tasks(), &config.skip_set(), cancel)
        .await;

    let reranker = build_reranker(&config);
    reranker.rank_sections(&mut sections, &config.quotas()).await;

    let snapshot = Snapshot::assemble(&config, &sections, today);
    snapshot.write_to(&cli.output)?;
    info!("Snapshot written to {}", cli.output.display());

    Ok(())
}

fn build_reranker(config: &Config) -> Reranker {
    let ranking = &config.ranking;
    if !ranking.enabled {
        info!("Ranking disabled, trimming sections to their quotas");
        return Reranker::disabled();
    }

    let client = match &config.gemini_api_key {
        Some(key) => {
            let service = GeminiService::new(key, &ranking.api_base, config.request_timeout());
            let gate = Arc::new(RateGate::new(ranking.min_call_gap()));
            Some(RankingClient::new(Arc::new(service), gate, ranking.retry_policy()))
        }
        None => {
            warn!("GEMINI_API_KEY not set, sections keep their original order");
            None
        }
    };

    Reranker::new(true, client, ranking.model_candidates())
}

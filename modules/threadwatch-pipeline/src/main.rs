use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use typed_builder::TypedBuilder;

use reddit_client::RedditClient;
use threadwatch_common::{Config, JobKind, Provider};
use threadwatch_pipeline::classify::{ClassifyOptions, ClassifyPipeline, ClassifyStats};
use threadwatch_pipeline::ingest::{IngestOptions, IngestStats, Ingestor, StaffRoster};
use threadwatch_pipeline::run_log;
use threadwatch_pipeline::source::RedditSource;
use threadwatch_pipeline::staff::{StaffDetector, StaffRunStats};
use threadwatch_pipeline::traits::Classifier;
use threadwatch_store::PgStore;

#[derive(Parser)]
#[command(name = "threadwatch", about = "Community thread ingestion, classification and staff response tracking")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch posts and replies created in [from, to), one calendar month at a time
    Ingest {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Label unanalyzed items, then repair incomplete labels
    Classify {
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Recompute staff response facts and per-staff stats
    Staff,
    /// Apply database migrations and exit
    Migrate,
}

/// Long-lived resources shared by every subcommand.
#[derive(TypedBuilder)]
struct Deps {
    config: Config,
    store: PgStore,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("threadwatch=info".parse()?);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = Config::load()?;
    config.log_redacted();

    let store = PgStore::connect(&config.database_url, config.file.database.max_connections).await?;
    store.migrate().await?;
    info!("Migrations applied");

    let deps = Deps::builder().config(config).store(store).build();

    let result = match cli.command {
        Command::Ingest { from, to } => ingest(&deps, from, to).await,
        Command::Classify { batch_size } => classify(&deps, batch_size).await,
        Command::Staff => staff(&deps).await,
        Command::Migrate => Ok(()),
    };

    deps.store.close().await;
    result
}

async fn ingest(deps: &Deps, from: NaiveDate, to: NaiveDate) -> Result<()> {
    if from >= to {
        bail!("--from ({from}) must be before --to ({to})");
    }
    let file = &deps.config.file;
    let (client_id, client_secret) = deps.config.reddit_credentials()?;

    let client = RedditClient::new(
        client_id,
        client_secret,
        &file.community.user_agent,
        Duration::from_secs(file.ingest.request_timeout_secs),
    )?;
    let source = RedditSource::new(client, &file.community.subreddit, file.ingest.page_size);
    let roster = StaffRoster::new(&file.staff.usernames);
    let ingestor = Ingestor::new(&source, &deps.store, IngestOptions::from_config(&file.ingest, roster));

    let started_at = Utc::now();
    let mut stats = IngestStats::default();
    let result = ingestor.ingest_range(from, to, &mut stats).await;

    run_log::record(&deps.store, JobKind::Ingest, started_at, &stats, result.as_ref().err()).await;
    info!("{stats}");
    result
}

fn build_classifier(config: &Config) -> Result<Box<dyn Classifier>> {
    let settings = &config.file.classifier;
    let api_key = config.classifier_api_key()?;
    let timeout = Duration::from_secs(settings.call_timeout_secs);

    Ok(match settings.provider {
        Provider::Anthropic => Box::new(
            ai_client::Claude::new(api_key, settings.model.as_str()).with_timeout(timeout),
        ),
        Provider::OpenAi => Box::new(
            ai_client::OpenAi::new(api_key, settings.model.as_str())
                .with_timeout(timeout)
                .json_mode(),
        ),
    })
}

async fn classify(deps: &Deps, batch_size: Option<usize>) -> Result<()> {
    let classifier = build_classifier(&deps.config)?;

    let mut options = ClassifyOptions::from_config(&deps.config.file.classifier);
    if let Some(n) = batch_size {
        if n == 0 {
            bail!("--batch-size must be at least 1");
        }
        options.batch_size = n;
    }
    let pipeline = ClassifyPipeline::new(classifier.as_ref(), &deps.store, options);

    let started_at = Utc::now();
    let mut stats = ClassifyStats::default();
    let result = pipeline.run(&mut stats).await;

    run_log::record(&deps.store, JobKind::Classify, started_at, &stats, result.as_ref().err()).await;
    info!("{stats}");
    result
}

async fn staff(deps: &Deps) -> Result<()> {
    let detector = StaffDetector::new(&deps.store);

    let started_at = Utc::now();
    let mut stats = StaffRunStats::default();
    let result = detector.detect_all(&mut stats).await;

    run_log::record(&deps.store, JobKind::Staff, started_at, &stats, result.as_ref().err()).await;
    info!("{stats}");
    result
}

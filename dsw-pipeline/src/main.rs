//! dsw-pipeline - disaster spike watch service
//!
//! Runs the enrichment cycle, the verification timer and the /health +
//! /stats endpoint until Ctrl+C or SIGTERM.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dsw_common::config::{load_config, resolve_config_path, PipelineConfig};
use dsw_common::events::EventBus;
use dsw_common::models::{Channel, IngestRequest, Subscriber};
use dsw_pipeline::adapters::{
    Analyzer, ChannelSender, ConfirmationFeed, HttpAnalyzer, HttpConfirmationFeed, HttpSignalSource,
    LogChannelSender, SignalSource, WebhookChannelSender,
};
use dsw_pipeline::rules::RuleTable;
use dsw_pipeline::services::post_queue::DEFAULT_QUEUE_CAPACITY;
use dsw_pipeline::services::{
    EnrichmentPipeline, NotificationDispatcher, OrchestratorSettings, PipelineOrchestrator, PostQueue,
    PostSubmitter, StatisticsTracker, VerificationMatcher,
};
use dsw_pipeline::{AppState, NotificationLedger, Repository, SqliteRepository};

/// Command-line arguments for dsw-pipeline
#[derive(Parser, Debug)]
#[command(name = "dsw-pipeline")]
#[command(about = "Disaster report enrichment, spike detection and alerting")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "DSW_CONFIG")]
    config: Option<PathBuf>,

    /// JSON-lines file of posts to enqueue at startup
    #[arg(long)]
    posts_file: Option<PathBuf>,

    /// JSON array of subscriber records to upsert at startup
    #[arg(long)]
    subscribers_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = load_config(config_path.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting dsw-pipeline v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }
    info!("Database: {}", config.database_path.display());

    let rules = RuleTable::load(config.rules_path.as_deref()).context("Failed to load rule table")?;
    info!(version = rules.version, "Rule table loaded");

    let pool = dsw_pipeline::db::init_database_pool(&config.database_path)
        .await
        .context("Failed to open database")?;
    let store = Arc::new(SqliteRepository::new(pool));
    let repository: Arc<dyn Repository> = store.clone();
    let ledger: Arc<dyn NotificationLedger> = store;

    if let Some(path) = &args.subscribers_file {
        let count = load_subscribers(path, repository.as_ref()).await?;
        info!("Loaded {} subscribers from {}", count, path.display());
    }

    let event_bus = EventBus::new(256);
    let stats = StatisticsTracker::new();
    let timeout = config.adapter_timeout();

    let mut enrichment = EnrichmentPipeline::new(repository.clone(), rules.clone(), event_bus.clone(), stats.clone())
        .with_adapter_timeout(timeout);
    if let Some(analyzer) = build_analyzer(&config, &rules)? {
        enrichment = enrichment.with_analyzer(analyzer);
    } else {
        warn!("No analyzer configured, every post uses the keyword classifier");
    }
    if let Some(base_url) = &config.signals.base_url {
        let signals: Arc<dyn SignalSource> = Arc::new(HttpSignalSource::new(base_url.clone(), timeout)?);
        enrichment = enrichment.with_signal_source(signals);
    }

    let dispatcher = Arc::new(NotificationDispatcher::new(
        repository.clone(),
        ledger.clone(),
        build_senders(&config)?,
        timeout,
        event_bus.clone(),
        stats.clone(),
    ));

    let feeds = config
        .confirmation
        .sources
        .iter()
        .map(|source| {
            HttpConfirmationFeed::new(source.name.clone(), source.url.clone(), timeout)
                .map(|feed| Arc::new(feed) as Arc<dyn ConfirmationFeed>)
        })
        .collect::<Result<Vec<_>, _>>()?;
    if feeds.is_empty() {
        warn!("No confirmation feeds configured, nothing will be verified");
    }
    let matcher = Arc::new(
        VerificationMatcher::new(
            repository.clone(),
            feeds,
            dispatcher.clone(),
            rules.clone(),
            event_bus.clone(),
            stats.clone(),
        )
        .with_feed_timeout(timeout),
    );

    let (submitter, queue) = PostQueue::new(DEFAULT_QUEUE_CAPACITY);
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(enrichment),
        dispatcher,
        repository,
        ledger,
        queue,
        OrchestratorSettings::from_config(&config),
        event_bus.clone(),
        stats.clone(),
    );

    let cancel = CancellationToken::new();

    if let Some(path) = args.posts_file.clone() {
        tokio::spawn(async move {
            match enqueue_posts_file(&path, submitter).await {
                Ok(count) => info!("Queued {} posts from {}", count, path.display()),
                Err(e) => warn!("Failed to load posts from {}: {:#}", path.display(), e),
            }
        });
    }

    let orchestrator_task = tokio::spawn(orchestrator.run(cancel.clone()));
    let matcher_task = tokio::spawn(matcher.run(config.verification_interval(), cancel.clone()));

    let state = AppState::new(stats, event_bus, config.cycle_interval());
    let app = dsw_pipeline::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.http_bind))?;
    info!("Health check: http://{}/health", config.http_bind);

    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_cancel.cancel();
        })
        .await
        .context("Server error")?;

    cancel.cancel();
    let _ = orchestrator_task.await;
    let _ = matcher_task.await;

    info!("Shutdown complete");
    Ok(())
}

fn build_analyzer(config: &PipelineConfig, rules: &RuleTable) -> Result<Option<Arc<dyn Analyzer>>> {
    let Some(base_url) = &config.analyzer.base_url else {
        return Ok(None);
    };
    let analyzer = HttpAnalyzer::new(
        base_url.clone(),
        config.analyzer.api_key.clone(),
        config.analyzer.requests_per_second,
        config.adapter_timeout(),
    )?
    .with_target_language(rules.primary_language());
    Ok(Some(Arc::new(analyzer)))
}

fn build_senders(config: &PipelineConfig) -> Result<Vec<Arc<dyn ChannelSender>>> {
    let channels = &config.channels;
    let mut senders: Vec<Arc<dyn ChannelSender>> = Vec::new();

    for (channel, webhook) in [
        (Channel::Email, &channels.email_webhook),
        (Channel::Sms, &channels.sms_webhook),
    ] {
        match webhook {
            Some(url) if !channels.dry_run => {
                senders.push(Arc::new(WebhookChannelSender::new(channel, url.clone(), config.adapter_timeout())?));
            }
            _ => {
                info!(channel = channel.as_str(), "Channel in dry-run mode");
                senders.push(Arc::new(LogChannelSender::new(channel)));
            }
        }
    }
    Ok(senders)
}

async fn load_subscribers(path: &Path, repository: &dyn Repository) -> Result<usize> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let subscribers: Vec<Subscriber> =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    for subscriber in &subscribers {
        repository.save_subscriber(subscriber).await?;
    }
    Ok(subscribers.len())
}

/// Enqueue one post per non-empty line; invalid lines are logged and skipped
async fn enqueue_posts_file(path: &Path, submitter: PostSubmitter) -> Result<usize> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut queued = 0;
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let request: IngestRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed post");
                continue;
            }
        };
        match submitter.submit(request).await {
            Ok(_) => queued += 1,
            Err(e) => warn!(line = line_no, error = %e, "Post rejected"),
        }
    }
    Ok(queued)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

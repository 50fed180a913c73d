use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::llm::ClientPool;
use crate::metrics;
use crate::queue::{JobDispatcher, QueueLane, ReviewQueue};
use crate::scm::GitLabClientFactory;
use crate::store::{Database, ReviewStore};
use crate::webhook::{AppState, WebhookIngestor};
use crate::worker::{ReviewHandler, WorkerPool, WorkerPoolConfig};

/// AI-assisted merge request review service.
#[derive(Parser)]
#[command(name = "reviewd")]
#[command(about = "AI-assisted merge request review service")]
#[command(version)]
#[command(
    long_about = "reviewd receives merge request webhooks, queues review jobs, and posts\nLLM-generated review comments back to the source-control host.\n\nExample usage:\n  reviewd migrate\n  reviewd serve --bind 0.0.0.0:8080\n  reviewd worker --workers 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the webhook HTTP server.
    Serve(ServeArgs),

    /// Run the review worker pool.
    Worker(WorkerArgs),

    /// Apply the database schema.
    Migrate,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Bind address, overriding REVIEWD_BIND_ADDR.
    #[arg(long)]
    pub bind: Option<String>,
}

#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of workers, overriding REVIEWD_WORKERS.
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Parse CLI arguments without executing a command.
///
/// Lets main.rs read the log level before commands run.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and execute the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Execute the selected command with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::Worker(args) => run_worker_command(args).await,
        Commands::Migrate => run_migrate_command().await,
    }
}

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = ServiceConfig::from_env()?;
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    config.validate()?;

    metrics::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let queue = ReviewQueue::connect(&config.redis_url, &config.queue_name).await?;

    let store: Arc<dyn ReviewStore> = Arc::new(database);
    let dispatcher: Arc<dyn JobDispatcher> = Arc::new(queue);
    let ingestor = Arc::new(WebhookIngestor::new(store, dispatcher, config.max_attempts));

    let addr: SocketAddr = config.bind_addr.parse()?;
    crate::webhook::serve(addr, AppState { ingestor }, shutdown_signal()).await?;

    info!("webhook server stopped");
    Ok(())
}

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    let mut config = ServiceConfig::from_env()?;
    if let Some(workers) = args.workers {
        config = config.with_num_workers(workers);
    }
    config.validate()?;

    metrics::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let queue = Arc::new(ReviewQueue::connect(&config.redis_url, &config.queue_name).await?);

    let store: Arc<dyn ReviewStore> = Arc::new(database);
    let handler = Arc::new(ReviewHandler::new(
        store,
        Arc::new(GitLabClientFactory),
        Arc::new(ClientPool::new()),
    ));

    let pool_config = WorkerPoolConfig::new(config.num_workers)
        .with_poll_interval(config.poll_interval)
        .with_job_timeout(config.job_timeout)
        .with_shutdown_timeout(config.shutdown_timeout);

    let mut pool = WorkerPool::new(pool_config, Arc::clone(&queue), handler);
    pool.start().await?;

    let gauge_task = tokio::spawn(refresh_queue_gauges(Arc::clone(&queue)));

    shutdown_signal().await;
    gauge_task.abort();
    info!("shutdown requested, draining workers");

    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "worker pool did not shut down cleanly");
    }

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        "worker pool stopped"
    );
    Ok(())
}

async fn run_migrate_command() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    info!("database schema applied");
    Ok(())
}

/// Periodically mirrors queue depths into the Prometheus gauges.
async fn refresh_queue_gauges(queue: Arc<ReviewQueue>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(15));
    loop {
        ticker.tick().await;
        for lane in QueueLane::all() {
            match queue.lane_len(lane).await {
                Ok(depth) => metrics::set_lane_depth(lane.as_str(), depth as i64),
                Err(e) => warn!(error = %e, "failed to read queue depth"),
            }
        }
        if let Ok(depth) = queue.dead_letter_len().await {
            metrics::set_dead_letter_depth(depth as i64);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}

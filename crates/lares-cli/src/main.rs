use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use lares_client::{FetchServiceClient, SynthesisServiceClient};
use lares_core::error::AppError;
use lares_core::status::{DedupStatus, GroupStatus, TaskKind};
use lares_core::store::{GroupStore, ListingStore};
use lares_core::{
    AttributeScorer, DedupEngine, DedupOutcome, JobLifecycleManager, PipelineConfig,
    RunOrchestrator, SynthesisGate, TaskManager, TaskWorker, TracingWorkerReporter, WorkerConfig,
};
use lares_db::{Database, DatabaseConfig, PgStore};

#[derive(Parser)]
#[command(name = "lares", version, about = "Real-estate listing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an ad-hoc discovery run against one search URL
    Discover {
        /// Platform slug (must exist in the catalog)
        #[arg(short, long)]
        platform: String,

        /// Search results URL to paginate through
        #[arg(short, long)]
        url: String,

        /// Label for the one-shot query (defaults to "adhoc")
        #[arg(long)]
        name: Option<String>,
    },

    /// Dispatch fetch tasks for pending discovered listings
    ProcessDiscovered {
        /// Restrict to one platform
        #[arg(long)]
        platform: Option<Uuid>,

        /// Batch size (defaults to LARES_DISCOVERED_BATCH_SIZE)
        #[arg(short, long)]
        batch: Option<usize>,
    },

    /// Run the matching engine over unlinked listings
    Dedup {
        /// Batch size (defaults to LARES_DEDUP_BATCH_SIZE)
        #[arg(short, long)]
        batch: Option<usize>,

        /// Process a single listing instead of a batch
        #[arg(short, long)]
        listing: Option<Uuid>,
    },

    /// Synthesize approved groups into canonical properties
    Synthesize {
        /// Maximum groups to process
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Start runs for all queries whose schedule has elapsed
    RunDue {
        /// Start even when next_run_at has not elapsed
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Report what would start without starting anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Consider only this query
        #[arg(short, long)]
        query: Option<Uuid>,
    },

    /// Re-enqueue the unfetched remainder of a stopped or failed run
    Resume {
        #[arg(short, long)]
        run: Uuid,
    },

    /// Stop an active run, dropping its queued tasks
    Stop {
        #[arg(short, long)]
        run: Uuid,
    },

    /// Re-dispatch failed tasks
    RetryFailed {
        #[arg(short, long)]
        run: Uuid,

        /// Retry a single task instead of the whole run
        #[arg(short, long)]
        task: Option<Uuid>,
    },

    /// Return rows abandoned by dead workers to their queues
    ResetStale {
        /// Staleness age in seconds (defaults to LARES_STALE_AFTER_SECS)
        #[arg(short, long)]
        age: Option<u64>,
    },

    /// Pipeline overview, or progress of one run
    Status {
        #[arg(short, long)]
        run: Option<Uuid>,
    },

    /// Human review of proposed duplicate groups
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Cancel in-flight pipeline work
    Cancel {
        #[command(subcommand)]
        scope: CancelScope,
    },

    /// Run a task worker until interrupted
    Worker {
        /// Stable worker identifier (defaults to a random one)
        #[arg(long)]
        id: Option<String>,

        /// Seconds between polls of an empty queue
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
    },
}

#[derive(Subcommand)]
enum ReviewAction {
    /// Groups awaiting review, oldest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Confirm a grouping and queue it for synthesis
    Approve {
        #[arg(short, long)]
        group: Uuid,
    },

    /// Reject a grouping; members return to independent processing
    Reject {
        #[arg(short, long)]
        group: Uuid,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Detach one listing from a multi-member group
    Remove {
        #[arg(short, long)]
        group: Uuid,

        #[arg(short, long)]
        listing: Uuid,
    },
}

#[derive(Subcommand)]
enum CancelScope {
    /// Return all in-flight dedup work to pending, or withdraw one listing
    Dedup {
        /// Withdraw this listing for good instead of resetting everything
        #[arg(short, long)]
        listing: Option<Uuid>,
    },

    /// Abort synthesis for one group
    Synthesis {
        #[arg(short, long)]
        group: Uuid,
    },

    /// Drop a run's queued tasks, optionally a single kind
    RunPhase {
        #[arg(short, long)]
        run: Uuid,

        /// "discovery" or "listing-fetch"
        #[arg(short, long)]
        kind: Option<TaskKind>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lares=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = connect_db().await?;
    let store = db.store();
    let config = PipelineConfig::from_env()?;

    match cli.command {
        Commands::Discover {
            platform,
            url,
            name,
        } => cmd_discover(&db, store, &platform, &url, name.as_deref()).await?,
        Commands::ProcessDiscovered { platform, batch } => {
            let manager = TaskManager::new(store, fetch_client()?);
            let dispatched = manager
                .process_pending_discovered(platform, batch.unwrap_or(config.discovered_batch_size))
                .await?;
            println!("Dispatched {dispatched} fetch tasks");
        }
        Commands::Dedup { batch, listing } => {
            let engine = DedupEngine::new(store, AttributeScorer);
            let result = match listing {
                Some(listing_id) => engine.process_listing(listing_id).await.map(|outcome| {
                    println!("Listing {listing_id}: {}", describe_outcome(&outcome));
                }),
                None => engine
                    .process_unlinked_listings(batch.unwrap_or(config.dedup_batch_size))
                    .await
                    .map(|report| {
                        println!(
                            "Processed {} listings ({} failed)",
                            report.processed, report.failed
                        );
                    }),
            };
            match result {
                Ok(()) => {}
                Err(AppError::FeatureDisabled(which)) => {
                    println!("Skipped: {which} is disabled via feature flags");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Synthesize { limit } => {
            let gate = SynthesisGate::new(store, synthesis_client()?);
            match gate.process_pending(limit).await {
                Ok(report) => println!(
                    "Synthesized {} groups ({} failed)",
                    report.processed, report.failed
                ),
                Err(AppError::FeatureDisabled(which)) => {
                    println!("Skipped: {which} is disabled via feature flags");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::RunDue {
            force,
            dry_run,
            query,
        } => {
            let orchestrator = RunOrchestrator::new(store);
            let report = orchestrator.run_due(force, dry_run, query).await?;
            if dry_run {
                println!(
                    "Would start {} runs ({} skipped, already active)",
                    report.would_start, report.skipped
                );
            } else {
                println!(
                    "Started {} runs ({} skipped, {} failed)",
                    report.started.len(),
                    report.skipped,
                    report.failed
                );
                for id in &report.started {
                    println!("  {id}");
                }
            }
            if report.failed > 0 {
                anyhow::bail!("{} queries failed to start", report.failed);
            }
        }
        Commands::Resume { run } => {
            let orchestrator = RunOrchestrator::new(store);
            let resumed = orchestrator.resume_run(run).await?;
            if resumed == 0 {
                println!("Nothing to resume for run {run}");
            } else {
                println!("Re-enqueued {resumed} fetch tasks for run {run}");
            }
        }
        Commands::Stop { run } => {
            let orchestrator = RunOrchestrator::new(store);
            let cleared = orchestrator.stop_run(run).await?;
            println!("Run {run} stopped; {cleared} queued tasks dropped");
        }
        Commands::RetryFailed { run, task } => {
            let manager = TaskManager::new(store, fetch_client()?);
            match task {
                Some(task_id) => {
                    let fresh = manager.retry_task(task_id).await?;
                    println!("Task {task_id} re-dispatched as {}", fresh.id);
                }
                None => {
                    let retried = manager.retry_all_failed(run).await?;
                    println!("Re-dispatched {retried} failed tasks");
                }
            }
        }
        Commands::ResetStale { age } => {
            let lifecycle = JobLifecycleManager::new(store, config);
            let report = lifecycle.reset_stale(age.map(Duration::from_secs)).await?;
            println!(
                "Reset {} stale listings, {} stale groups",
                report.listings_reset, report.groups_reset
            );
        }
        Commands::Status { run } => cmd_status(store, config, run).await?,
        Commands::Review { action } => cmd_review(store, action).await?,
        Commands::Cancel { scope } => {
            let lifecycle = JobLifecycleManager::new(store, config);
            match scope {
                CancelScope::Dedup { listing } => match listing {
                    Some(listing_id) => {
                        lifecycle.withdraw_from_dedup(listing_id).await?;
                        println!("Listing {listing_id} withdrawn from dedup");
                    }
                    None => {
                        let reset = lifecycle.cancel_dedup().await?;
                        println!("Dedup cancelled; {reset} in-flight listings reset to pending");
                    }
                },
                CancelScope::Synthesis { group } => {
                    let affected = lifecycle.cancel_synthesis(group).await?;
                    println!("Synthesis cancelled for group {group}; {affected} listings affected");
                }
                CancelScope::RunPhase { run, kind } => {
                    let cleared = lifecycle.cancel_run_phase(run, kind).await?;
                    println!("Cleared {cleared} queued tasks");
                }
            }
        }
        Commands::Worker { id, poll_interval } => {
            let mut worker_config = WorkerConfig {
                poll_interval: Duration::from_secs(poll_interval),
                ..WorkerConfig::default()
            };
            if let Some(id) = id {
                worker_config.worker_id = id;
            }
            cmd_worker(store, worker_config).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and run pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().context("DATABASE_URL not set")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Migration failed")?;
    Ok(db)
}

fn describe_outcome(outcome: &DedupOutcome) -> String {
    match outcome {
        DedupOutcome::Skipped => "skipped (already handled or nothing to match on)".into(),
        DedupOutcome::Grouped { group_id } => format!("new group {group_id} formed"),
        DedupOutcome::JoinedGroup { group_id } => format!("joined group {group_id}"),
        DedupOutcome::MatchedProperty { property_id, .. } => {
            format!("matched existing property {property_id}")
        }
        DedupOutcome::Deferred => "deferred, best match is held by another worker".into(),
        DedupOutcome::Unique => "unique, no match above threshold".into(),
    }
}

fn fetch_client() -> Result<FetchServiceClient> {
    let url = std::env::var("LARES_FETCH_URL")
        .unwrap_or_else(|_| "http://localhost:8700".to_string());
    Ok(FetchServiceClient::new(&url)?)
}

fn synthesis_client() -> Result<SynthesisServiceClient> {
    let url = std::env::var("LARES_SYNTHESIS_URL")
        .unwrap_or_else(|_| "http://localhost:8701".to_string());
    Ok(SynthesisServiceClient::new(&url)?)
}

/// Ad-hoc discovery: a one-shot query row keeps every task run-scoped,
/// so resume/retry/status work the same as for scheduled runs.
async fn cmd_discover(
    db: &Database,
    store: PgStore,
    platform_slug: &str,
    url: &str,
    name: Option<&str>,
) -> Result<()> {
    use lares_core::store::CatalogStore;

    let platform = store
        .get_platform_by_slug(platform_slug)
        .await?
        .with_context(|| format!("Unknown platform '{platform_slug}'"))?;

    let (query_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO search_queries (platform_id, name, url, active, auto_run)
        VALUES ($1, $2, $3, TRUE, FALSE)
        RETURNING id
        "#,
    )
    .bind(platform.id)
    .bind(name.unwrap_or("adhoc"))
    .bind(url)
    .fetch_one(db.pool())
    .await
    .context("Failed to create one-shot query")?;

    let orchestrator = RunOrchestrator::new(store);
    let run = orchestrator.start_run(query_id).await?;
    println!("Run {} started ({})", run.id, run.status);
    Ok(())
}

async fn cmd_status(store: PgStore, config: PipelineConfig, run: Option<Uuid>) -> Result<()> {
    match run {
        Some(run_id) => {
            let orchestrator = RunOrchestrator::new(store);
            let stats = orchestrator.stats(run_id).await?;
            let progress = orchestrator.progress(run_id).await?;
            println!("Run {run_id}: {}% overall", progress.overall_pct);
            println!(
                "  discovery: {}/{} pages ({} failed) — {:.0}%",
                stats.discovery_done_pages,
                stats.discovery_total_pages,
                stats.discovery_failed_pages,
                progress.discovery_pct
            );
            println!(
                "  scraping:  {}/{} listings ({} failed) — {:.0}%",
                stats.listings_scraped,
                stats.listings_found,
                stats.listings_failed,
                progress.scraping_pct
            );
        }
        None => {
            let lifecycle = JobLifecycleManager::new(store.clone(), config);
            for kind in [TaskKind::Discovery, TaskKind::ListingFetch] {
                let depth = lifecycle.queue_depth(kind).await?;
                println!(
                    "{kind}: {} queued ({} pending, {} reserved, {} delayed)",
                    depth.total(),
                    depth.pending,
                    depth.reserved,
                    depth.delayed
                );
            }
            let dedup_pending = store.count_dedup(DedupStatus::Pending).await?;
            let review = store.count_groups(GroupStatus::PendingReview).await?;
            let synthesis = store.count_groups(GroupStatus::PendingAi).await?;
            println!("dedup: {dedup_pending} listings pending");
            println!("review: {review} groups awaiting review");
            println!("synthesis: {synthesis} groups approved");
        }
    }
    Ok(())
}

async fn cmd_review(store: PgStore, action: ReviewAction) -> Result<()> {
    let engine = DedupEngine::new(store, AttributeScorer);
    match action {
        ReviewAction::List { limit } => {
            let groups = engine.pending_review(limit).await?;
            if groups.is_empty() {
                println!("No groups awaiting review");
                return Ok(());
            }
            for group in &groups {
                let score = group
                    .match_score
                    .map(|s| format!("{s:.2}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  score={}  created={}",
                    group.id,
                    score,
                    group.created_at.format("%Y-%m-%d %H:%M UTC")
                );
            }
            println!("\nTotal: {} groups", groups.len());
        }
        ReviewAction::Approve { group } => {
            engine.approve_group(group).await?;
            println!("Group {group} approved for synthesis");
        }
        ReviewAction::Reject { group, reason } => {
            let detached = engine.reject_group(group, reason.as_deref()).await?;
            println!("Group {group} rejected; {detached} listings returned to dedup");
        }
        ReviewAction::Remove { group, listing } => {
            engine.remove_listing_from_group(group, listing).await?;
            println!("Listing {listing} removed from group {group}");
        }
    }
    Ok(())
}

async fn cmd_worker(store: PgStore, config: WorkerConfig) -> Result<()> {
    let worker = TaskWorker::new(store, fetch_client()?, config);
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    worker.run(cancel, &TracingWorkerReporter).await?;
    Ok(())
}

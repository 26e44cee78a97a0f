//! `resumectl` — the operator CLI for the resume intelligence engine.
//!
//! This is the one concrete consumer of `resume-runtime` in this repository.
//! It stands in for the GraphQL/REST/web-UI transport layer that is out of
//! scope, wiring the same object graph a real service would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use uuid::Uuid;

use resume_runtime::{
    create_persistence, create_storage, AuditStore, EnrichmentStore, LlmGateway, MatchEngine,
    PersistenceGateway, ResumeJobHandler, ResumeJobProcessor, RuntimeConfig, Scheduler,
    TrackerStore, UploadFile, UploadRouter, WorkerPool,
};

#[derive(Parser)]
#[command(name = "resumectl")]
#[command(about = "Operator CLI for the resume intelligence engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the runtime TOML config file.
    #[arg(short = 'c', long = "config", global = true, env = "RESUME_ENGINE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one or more resume files
    ///
    /// Examples:
    ///   resumectl upload ./jane.pdf
    ///   resumectl upload ./batch.zip --correlation-id campaign-42
    Upload {
        /// Paths to resume files (.pdf, .doc, .docx, or a .zip of them)
        files: Vec<PathBuf>,

        /// Correlation id to tag this upload batch with
        #[arg(long)]
        correlation_id: Option<String>,
    },

    /// Poll the status of an upload batch
    Tracker {
        /// Tracker id returned by `upload`
        id: Uuid,
    },

    /// Score one candidate against one job requirement
    MatchOne {
        candidate_id: Uuid,
        job_id: Uuid,
    },

    /// Score every candidate on file against one job requirement
    MatchAll {
        job_id: Uuid,

        /// How many candidates to score concurrently
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Free-text identity of whoever kicked this run off, for the audit row
        #[arg(long)]
        initiated_by: Option<String>,
    },

    /// Run the durable job queue's scheduler and worker pool until interrupted
    ///
    /// Only meaningful when `scheduler.enabled = true` in the config file —
    /// uploads taken while this isn't running just sit `PENDING` in the queue.
    Worker {
        #[arg(long, default_value = "resumectl-worker")]
        worker_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let cfg = RuntimeConfig::load(Some(&cli.config)).context("loading runtime config")?;

    match cli.command {
        Commands::Upload { files, correlation_id } => upload(cfg, files, correlation_id).await,
        Commands::Tracker { id } => tracker(cfg, id).await,
        Commands::MatchOne { candidate_id, job_id } => match_one(cfg, candidate_id, job_id).await,
        Commands::MatchAll { job_id, concurrency, initiated_by } => {
            match_all(cfg, job_id, concurrency, initiated_by).await
        }
        Commands::Worker { worker_id } => worker(cfg, worker_id).await,
    }
}

async fn upload(cfg: RuntimeConfig, files: Vec<PathBuf>, correlation_id: Option<String>) -> Result<()> {
    let persistence = create_persistence(&cfg).await?;
    let queue = create_storage(&cfg).await?;
    let tracker = Arc::new(TrackerStore::new(persistence.clone()));
    let llm = Arc::new(LlmGateway::new(cfg.llm.clone())?);
    let processor = Arc::new(ResumeJobProcessor::new(persistence, llm, cfg.clone()));
    let router = UploadRouter::new(queue, tracker, processor, &cfg);

    let mut upload_files = Vec::with_capacity(files.len());
    for path in &files {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("resume")
            .to_string();
        upload_files.push(UploadFile { filename, bytes });
    }

    let tracker_id = router.upload(upload_files, correlation_id).await?;
    println!("{} {}", "tracker:".bold(), tracker_id);
    Ok(())
}

async fn tracker(cfg: RuntimeConfig, id: Uuid) -> Result<()> {
    let persistence = create_persistence(&cfg).await?;
    let store = TrackerStore::new(persistence);
    let t = store.get(id).await?;
    println!("{:<16} {:?}", "status:".dimmed(), t.status);
    println!("{:<16} {}/{}", "processed:".dimmed(), t.processed_files, t.total_files);
    println!("{:<16} {}", "failed:".dimmed(), t.failed_files);
    if let Some(msg) = &t.message {
        println!("{:<16} {}", "message:".dimmed(), msg);
    }
    println!("{t:#?}");
    Ok(())
}

async fn match_one(cfg: RuntimeConfig, candidate_id: Uuid, job_id: Uuid) -> Result<()> {
    let (engine, persistence) = build_match_engine(&cfg).await?;

    let candidate = persistence
        .get_candidate(candidate_id)
        .await?
        .with_context(|| format!("candidate {candidate_id} not found"))?;
    let job = persistence
        .get_job_requirement(job_id)
        .await?
        .with_context(|| format!("job requirement {job_id} not found"))?;

    let m = engine.match_one(&candidate, &job).await?;
    let label = if m.is_shortlisted { "shortlisted".green() } else { "not shortlisted".yellow() };
    println!("{} {:.1} ({})", "score:".bold(), m.match_score, label);
    println!("{m:#?}");
    Ok(())
}

async fn match_all(
    cfg: RuntimeConfig,
    job_id: Uuid,
    concurrency: usize,
    initiated_by: Option<String>,
) -> Result<()> {
    let (engine, persistence) = build_match_engine(&cfg).await?;

    let job = persistence
        .get_job_requirement(job_id)
        .await?
        .with_context(|| format!("job requirement {job_id} not found"))?;
    let candidates = persistence.list_candidates().await?;

    let results = engine.match_all(&candidates, &job, initiated_by, concurrency.max(1)).await?;
    println!("{} {} of {}", "matched:".bold(), results.len(), candidates.len());
    for m in &results {
        let marker = if m.is_shortlisted { "*".green() } else { " ".normal() };
        println!("  {} {} -> {:.1}", marker, m.candidate_id, m.match_score);
    }
    Ok(())
}

async fn build_match_engine(cfg: &RuntimeConfig) -> Result<(MatchEngine, Arc<dyn PersistenceGateway>)> {
    let persistence = create_persistence(cfg).await?;
    let llm = Arc::new(LlmGateway::new(cfg.llm.clone())?);
    let enrichment = Arc::new(EnrichmentStore::new(persistence.clone(), &cfg.enrichment));
    let audit = Arc::new(AuditStore::new(persistence.clone(), cfg.audit.clone()));
    let engine = MatchEngine::new(persistence.clone(), enrichment, llm, audit, cfg.enrichment.clone());
    Ok((engine, persistence))
}

async fn worker(cfg: RuntimeConfig, worker_id: String) -> Result<()> {
    if !cfg.scheduler.enabled {
        println!(
            "{}",
            "scheduler.enabled is false; uploads are taking the legacy in-process path and this worker has nothing to claim".yellow()
        );
    }

    let queue = create_storage(&cfg).await?;
    let persistence = create_persistence(&cfg).await?;
    let llm = Arc::new(LlmGateway::new(cfg.llm.clone())?);
    let processor = Arc::new(ResumeJobProcessor::new(persistence, llm, cfg.clone()));

    let pool = WorkerPool::new(
        queue.clone(),
        worker_id,
        cfg.scheduler.batch_size as i64,
        cfg.scheduler.thread_pool_size,
        cfg.scheduler.poll_interval,
        // Jobs running past the stale threshold get swept back to pending
        // anyway, so that doubles as this pool's per-job hard timeout.
        cfg.scheduler.stale_threshold,
        cfg.queue.retry_delay,
    )
    .with_handler(Box::new(ResumeJobHandler::new(processor)));

    let scheduler = Scheduler::new(queue, cfg.scheduler.clone(), cfg.queue.retry_delay);
    let handle = scheduler.spawn(pool).await?;

    println!("{}", "scheduler running, press ctrl-c to stop".bold());
    tokio::signal::ctrl_c().await?;
    println!("{}", "shutting down...".dimmed());
    handle.shutdown(Duration::from_secs(5)).await?;
    Ok(())
}

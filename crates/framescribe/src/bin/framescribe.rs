//! Command line front end: create, run, retry and inspect jobs, or start a
//! long-running worker.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use framescribe::config::default_config_path;
use framescribe::db::job_repo::{self, JobFilter};
use framescribe::pipeline::LogProgress;
use framescribe::{
    load_config, resolve_secret, Config, Database, FileStore, JobKind, JobProgress, JobStatus,
    JobStep, ObjectStore, OpenAiBatchClient, Pipeline, PipelineConfig, UrlSigner, WorkerPool,
};

const DEFAULT_LOG_FILTER: &str = "framescribe=info";

#[derive(Parser)]
#[command(name = "framescribe", version, about = "Turn archives of video frames into subtitle transcripts")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "FRAMESCRIBE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a job over an archive in the object store
    Create {
        /// Object key of the frame archive
        source_key: String,

        /// Owner recorded on the job
        #[arg(long, default_value = "local")]
        owner: String,

        /// ocr or strip
        #[arg(long, default_value = "ocr")]
        kind: JobKind,

        /// Upload this local file to SOURCE_KEY first
        #[arg(long)]
        file: Option<PathBuf>,

        /// Run the job in the foreground right away
        #[arg(long)]
        run: bool,
    },
    /// Run a job in the foreground until it finishes or fails
    Run { job_id: String },
    /// Reset a failed job so it can run again
    Retry {
        job_id: String,

        /// Step to resume from (defaults to the step it failed in)
        #[arg(long)]
        from_step: Option<JobStep>,

        /// Run the job in the foreground after resetting it
        #[arg(long)]
        run: bool,
    },
    /// Print a job and its progress as JSON
    Status { job_id: String },
    /// List jobs, newest first
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long)]
        kind: Option<JobKind>,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Process PENDING and interrupted jobs until Ctrl-C
    Worker {
        /// Worker threads (defaults to worker_count from the config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Seconds between scans for new jobs
        #[arg(long, default_value_t = 5)]
        scan_interval: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path().context("could not determine the config directory")?,
    };
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match cli.command {
        Command::Create {
            source_key,
            owner,
            kind,
            file,
            run,
        } => {
            let pipeline = build_pipeline(&config)?;
            if let Some(file) = file {
                let size = pipeline
                    .store()
                    .put_file(&source_key, &file)
                    .with_context(|| format!("failed to upload {}", file.display()))?;
                info!("Uploaded {} to {} ({} bytes)", file.display(), source_key, size);
            }
            let job = pipeline.create_job(&owner, kind, &source_key)?;
            println!("{}", job.id);
            if run {
                run_foreground(&pipeline, &job.id)?;
            }
        }
        Command::Run { job_id } => {
            let pipeline = build_pipeline(&config)?;
            run_foreground(&pipeline, &job_id)?;
        }
        Command::Retry {
            job_id,
            from_step,
            run,
        } => {
            let pipeline = build_pipeline(&config)?;
            let job = pipeline.retry(&job_id, from_step)?;
            println!("{} reset to {}", job.id, job.step);
            if run {
                run_foreground(&pipeline, &job.id)?;
            }
        }
        Command::Status { job_id } => {
            let db = open_database(&config)?;
            let job = job_repo::find_by_id(&db, &job_id)?
                .with_context(|| format!("job {} not found", job_id))?;
            let report = serde_json::json!({
                "job": job,
                "progress": JobProgress::of(&job),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::List {
            owner,
            status,
            kind,
            limit,
        } => {
            let db = open_database(&config)?;
            let filter = JobFilter {
                owner_id: owner,
                status,
                kind,
                limit: Some(limit),
                offset: None,
            };
            let (jobs, total) = job_repo::query(&db, &filter)?;
            for job in &jobs {
                let progress = JobProgress::of(job);
                println!(
                    "{}  {:<10} {:<15} {:>5.1}%  {}",
                    job.id, job.status, job.step, progress.percent, job.created_at
                );
            }
            println!("{} of {} jobs", jobs.len(), total);
        }
        Command::Worker {
            workers,
            scan_interval,
        } => {
            let pipeline = Arc::new(build_pipeline(&config)?);
            let worker_count = workers.unwrap_or(config.worker_count);
            if worker_count == 0 {
                bail!("--workers must be at least 1");
            }
            run_worker(pipeline, worker_count, Duration::from_secs(scan_interval))?;
        }
    }

    Ok(())
}

fn init_logging(json: bool) -> Result<()> {
    LogTracer::init().context("failed to route log records to tracing")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        )
    }
    .context("failed to install tracing subscriber")?;

    Ok(())
}

fn open_database(config: &Config) -> Result<Database> {
    let path = Path::new(&config.database_path);
    Database::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let db = open_database(config)?;

    let signer = UrlSigner::from_env(&config.storage.signing_key_env)
        .context("URL signing key is not configured")?;
    let store: Arc<dyn ObjectStore> = Arc::new(FileStore::new(
        &config.storage.root,
        &config.storage.public_base_url,
        signer,
    ));

    let api_key = resolve_secret(
        config.batch.api_key.as_deref(),
        config.batch.api_key_file.as_deref(),
        config.batch.api_key_env.as_deref(),
    )
    .context("batch API key is not configured")?;
    let batch = Arc::new(OpenAiBatchClient::new(&config.batch.base_url, api_key)?);

    Ok(Pipeline::new(
        Arc::new(PipelineConfig::from_config(config)),
        db,
        store,
        batch,
    ))
}

fn run_foreground(pipeline: &Pipeline, job_id: &str) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let job = runtime.block_on(pipeline.run(job_id, &LogProgress))?;
    println!("{} {}", job.id, job.status);
    if let Some(key) = &job.text_key {
        println!("text:   {}", key);
    }
    if let Some(key) = &job.docx_key {
        println!("docx:   {}", key);
    }
    if let Some(key) = &job.images_zip_key {
        println!("images: {}", key);
    }
    Ok(())
}

fn run_worker(pipeline: Arc<Pipeline>, worker_count: usize, scan_interval: Duration) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;

    let pool = WorkerPool::new(pipeline, Arc::new(LogProgress), worker_count);
    pool.recover()?;
    let mut last_scan = Instant::now();

    while running.load(Ordering::SeqCst) {
        while let Some(outcome) = pool.try_recv_result() {
            match outcome.error {
                None => info!("Job {} finished", outcome.job_id),
                Some(error) => warn!("Job {} did not finish: {}", outcome.job_id, error),
            }
        }

        if last_scan.elapsed() >= scan_interval {
            pool.recover()?;
            last_scan = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    pool.shutdown();
    pool.wait();
    Ok(())
}

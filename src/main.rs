use anyhow::Result;
use backup_engine::backup::{ExecutionOrchestrator, JobOutcome};
use backup_engine::sinks::{LogSink, StateBoard, StateSink};
use backup_engine::storage::{JobList, JobSource, JsonLinesLog, Storage};
use backup_engine::utils::selection::parse_job_selection;
use backup_engine::utils::{self, Config, LogBuffer, LogSinkKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "backup-engine", version, about = "Run configured backup jobs")]
struct Cli {
    /// Configuration file (defaults to ./backup-engine.* when present)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run jobs: "1-3", "1;3", "all"
    Run { selection: String },
    /// List configured jobs
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    utils::logging::init_tracing();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let jobs = JobList::load(&config.jobs_file).await?;

    match cli.command {
        Command::List => {
            for job in jobs.jobs() {
                println!(
                    "{:>4}  {:<24} {:?}  {} -> {}",
                    job.id,
                    job.name,
                    job.backup_type,
                    job.source_directory.display(),
                    job.target_directory.display()
                );
            }
            Ok(())
        }
        Command::Run { selection } => {
            let selection = parse_job_selection(&selection)?;
            let ids = selection.resolve(jobs.ids());
            let code = run(config, jobs, ids).await?;
            std::process::exit(code);
        }
    }
}

async fn run(config: Config, jobs: JobList, ids: Vec<u32>) -> Result<i32> {
    info!("Starting backup engine v{}", env!("CARGO_PKG_VERSION"));

    let log_sink: Arc<dyn LogSink> = match config.log_sink {
        LogSinkKind::Jsonl => Arc::new(JsonLinesLog::new(&config.log_dir)),
        LogSinkKind::Sqlite => {
            let storage = Storage::new(&config.database_url).await?;
            storage.run_migrations().await?;
            Arc::new(storage)
        }
        LogSinkKind::Memory => Arc::new(LogBuffer::new(10_000)),
    };

    let board = StateBoard::new();
    let progress_task = tokio::spawn(echo_progress(board.clone()));
    let state_sink: Arc<dyn StateSink> = Arc::new(board);

    let orchestrator = ExecutionOrchestrator::new(
        Arc::new(config.settings),
        Arc::new(jobs) as Arc<dyn JobSource>,
        log_sink,
        state_sink,
    );

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let report = orchestrator.run_many(&ids).await;
    progress_task.abort();

    for job in &report.jobs {
        match &job.outcome {
            JobOutcome::Completed { transferred, failed } => {
                println!("job {}: completed ({} transferred, {} failed)", job.job_id, transferred, failed)
            }
            JobOutcome::Failed { reason } => println!("job {}: failed ({})", job.job_id, reason),
            JobOutcome::Cancelled => println!("job {}: cancelled", job.job_id),
            JobOutcome::Skipped(reason) => println!("job {}: skipped ({})", job.job_id, reason),
        }
    }

    Ok(report.exit_code())
}

async fn echo_progress(board: StateBoard) {
    let mut rx = board.subscribe();
    loop {
        match rx.recv().await {
            Ok(progress) => info!(
                "[{}] {} {}: {}/{} files left, {} bytes left",
                progress.job_id,
                progress.job_name,
                progress.state,
                progress.files_remaining,
                progress.files_total,
                progress.bytes_remaining
            ),
            Err(RecvError::Lagged(skipped)) => warn!("Progress display skipped {} updates", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal;

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
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, cancelling backups");
}

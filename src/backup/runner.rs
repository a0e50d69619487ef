use super::coordinator::GlobalCoordinator;
use super::encryption::EncryptionGate;
use super::transfer::{self, CopyError};
use super::{BackupJob, FileTransferUnit, JobOutcome, JobProgress, JobRunState, LogEntry};
use crate::error::Cancelled;
use crate::sinks::{LogSink, StateSink};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Transfer time recorded when the copy itself failed.
pub const TRANSFER_FAILED: i64 = -1;

/// Everything a job needs from the run it belongs to.
#[derive(Clone)]
pub struct RunContext {
    pub coordinator: Arc<GlobalCoordinator>,
    pub encryption: Arc<EncryptionGate>,
    pub log_sink: Arc<dyn LogSink>,
    pub state_sink: Arc<dyn StateSink>,
    pub cancel: CancellationToken,
}

/// Drives one job from `Active` to `Completed` or `Failed`.
///
/// Files are processed strictly in plan order. Per-file copy and
/// encryption failures land in that file's `LogEntry` and the loop moves
/// on; only losing the source tree or a cancellation ends the job early.
/// The outcome counts copies, so encryption failures only show up in the log.
pub struct JobRunner {
    job: BackupJob,
    ctx: RunContext,
    progress: JobProgress,
}

impl JobRunner {
    pub fn new(job: BackupJob, ctx: RunContext) -> Self {
        let progress = JobProgress::idle(&job, JobRunState::Inactive);
        Self { job, ctx, progress }
    }

    pub async fn run(mut self, plan: Vec<FileTransferUnit>) -> JobOutcome {
        self.progress.files_total = plan.len() as u64;
        self.progress.files_remaining = plan.len() as u64;
        self.progress.bytes_total = plan.iter().map(|unit| unit.size_bytes).sum();
        self.progress.bytes_remaining = self.progress.bytes_total;
        self.publish(JobRunState::Active);

        info!(
            "Backup {:?} active: {} files, {} bytes",
            self.job.name, self.progress.files_total, self.progress.bytes_total
        );

        let mut priority_pending = plan.iter().filter(|unit| unit.is_priority).count() as u64;
        let mut transferred = 0u64;
        let mut failed = 0u64;

        for unit in &plan {
            if !self.job.source_directory.is_dir() {
                error!(
                    "Backup {:?} lost its source directory {}",
                    self.job.name,
                    self.job.source_directory.display()
                );
                let reason = format!(
                    "source directory {} is no longer accessible",
                    self.job.source_directory.display()
                );
                return self.abort(priority_pending, JobOutcome::Failed { reason });
            }

            let entry = match self.transfer(unit).await {
                Ok(entry) => entry,
                Err(Cancelled) => {
                    info!("Backup {:?} cancelled", self.job.name);
                    return self.abort(priority_pending, JobOutcome::Cancelled);
                }
            };

            if entry.transfer_time_ms < 0 {
                failed += 1;
            } else {
                transferred += 1;
            }
            self.ctx.log_sink.append(entry).await;

            // Failed priority files count as processed too
            if unit.is_priority {
                priority_pending -= 1;
                self.ctx.coordinator.complete_priority(1);
            }

            self.progress.files_remaining -= 1;
            self.progress.bytes_remaining = self.progress.bytes_remaining.saturating_sub(unit.size_bytes);
            self.publish(JobRunState::Active);
        }

        self.progress.current_source = None;
        self.progress.current_target = None;
        self.publish(JobRunState::Completed);

        info!(
            "Backup {:?} completed: {} transferred, {} failed",
            self.job.name, transferred, failed
        );
        JobOutcome::Completed { transferred, failed }
    }

    async fn transfer(&mut self, unit: &FileTransferUnit) -> Result<LogEntry, Cancelled> {
        let coordinator = self.ctx.coordinator.clone();
        let cancel = self.ctx.cancel.clone();

        let admission = coordinator.admit(unit, &cancel).await?;

        self.progress.current_source = Some(unit.source_path.clone());
        self.progress.current_target = Some(unit.target_path.clone());
        self.publish(JobRunState::Active);
        debug!("Transferring {}", unit.source_path.display());

        let start = Instant::now();
        let copied = transfer::copy_file(&unit.source_path, &unit.target_path, &coordinator, &cancel).await;
        let elapsed = start.elapsed().as_millis() as i64;
        drop(admission);

        let (transfer_time_ms, error_message) = match copied {
            Ok(_) => (elapsed, None),
            Err(CopyError::Cancelled) => {
                // Partial target is worthless
                let _ = tokio::fs::remove_file(&unit.target_path).await;
                return Err(Cancelled);
            }
            Err(CopyError::Io(e)) => {
                warn!("Failed to copy {}: {}", unit.source_path.display(), e);
                (TRANSFER_FAILED, Some(e.to_string()))
            }
        };

        let crypting_time_ms = if unit.needs_encryption && error_message.is_none() {
            let code = self.ctx.encryption.encrypt(&unit.target_path, &cancel).await?;
            if code >= 0 {
                // The tool rewrote the target in place
                if let Err(e) = transfer::copy_mtime(&unit.source_path, &unit.target_path).await {
                    warn!("Failed to restore mtime on {}: {}", unit.target_path.display(), e);
                }
            }
            code
        } else {
            0
        };

        let error_message = match (error_message, crypting_time_ms) {
            (Some(message), _) => Some(message),
            (None, code) if code < 0 => Some(format!("encryption failed with code {}", code)),
            (None, _) => None,
        };

        Ok(LogEntry {
            timestamp: Utc::now(),
            backup_name: self.job.name.clone(),
            source_path: unit.source_path.clone(),
            target_path: unit.target_path.clone(),
            file_size_bytes: unit.size_bytes,
            transfer_time_ms,
            crypting_time_ms,
            error_message,
        })
    }

    /// Stop early: hand back unprocessed priority units and mark the job failed.
    fn abort(mut self, priority_pending: u64, outcome: JobOutcome) -> JobOutcome {
        self.ctx.coordinator.complete_priority(priority_pending);
        self.progress.current_source = None;
        self.progress.current_target = None;
        self.publish(JobRunState::Failed);
        outcome
    }

    fn publish(&mut self, state: JobRunState) {
        self.progress.state = state;
        self.progress.updated_at = Utc::now();
        self.ctx.state_sink.update(self.progress.clone());
    }
}

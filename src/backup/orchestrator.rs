use super::business_monitor::{BusinessProcessMonitor, ProcessProbe, SystemProcessProbe};
use super::coordinator::GlobalCoordinator;
use super::encryption::EncryptionGate;
use super::planner::FileTransferPlanner;
use super::runner::{JobRunner, RunContext};
use super::{BackupJob, FileTransferUnit, JobId, JobOutcome, JobProgress, JobRunState, SkipReason};
use crate::sinks::{LogSink, StateSink};
use crate::storage::jobs::JobSource;
use crate::utils::config::GeneralSettings;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: JobId,
    pub outcome: JobOutcome,
    /// The job passed its preconditions and planning and was handed to a runner
    pub activated: bool,
}

/// Result of one `run_many` call, in request order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn outcome(&self, job_id: JobId) -> Option<&JobOutcome> {
        self.jobs
            .iter()
            .find(|report| report.job_id == job_id)
            .map(|report| &report.outcome)
    }

    pub fn ran(&self, job_id: JobId) -> bool {
        self.jobs
            .iter()
            .any(|report| report.job_id == job_id && report.activated)
    }

    pub fn jobs_ran(&self) -> usize {
        self.jobs.iter().filter(|report| report.activated).count()
    }

    /// Non-zero only when no requested job became active.
    pub fn exit_code(&self) -> i32 {
        if self.jobs_ran() == 0 {
            1
        } else {
            0
        }
    }
}

/// Runs a batch of jobs concurrently, one worker per job, all sharing one
/// `GlobalCoordinator` for the lifetime of the batch.
pub struct ExecutionOrchestrator {
    settings: Arc<GeneralSettings>,
    jobs: Arc<dyn JobSource>,
    log_sink: Arc<dyn LogSink>,
    state_sink: Arc<dyn StateSink>,
    probe: Arc<dyn ProcessProbe>,
    cancel: Mutex<CancellationToken>,
}

impl ExecutionOrchestrator {
    pub fn new(
        settings: Arc<GeneralSettings>,
        jobs: Arc<dyn JobSource>,
        log_sink: Arc<dyn LogSink>,
        state_sink: Arc<dyn StateSink>,
    ) -> Self {
        Self {
            settings,
            jobs,
            log_sink,
            state_sink,
            probe: Arc::new(SystemProcessProbe::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Cancelling this token stops every job of the current run (or of the
    /// next one, if none is running) at its next wait. Once a cancelled run
    /// finishes the orchestrator switches to a fresh token, so callers must
    /// fetch it again for later runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    pub async fn run_many(&self, job_ids: &[JobId]) -> RunReport {
        let run_id = Uuid::new_v4();
        info!("Starting run {} for jobs {:?}", run_id, job_ids);

        let mut reports: Vec<JobReport> = Vec::with_capacity(job_ids.len());
        let mut runnable: Vec<(usize, BackupJob, Vec<FileTransferUnit>)> = Vec::new();
        let mut seen = HashSet::new();

        for &job_id in job_ids {
            if !seen.insert(job_id) {
                continue;
            }

            let slot = reports.len();
            let (outcome, activated) = match self.prepare(job_id).await {
                Ok((job, plan)) => {
                    runnable.push((slot, job, plan));
                    // Filled in once the runner finishes
                    (JobOutcome::Cancelled, true)
                }
                Err(outcome) => (outcome, false),
            };
            reports.push(JobReport {
                job_id,
                outcome,
                activated,
            });
        }

        let priority_files: u64 = runnable
            .iter()
            .map(|(_, _, plan)| plan.iter().filter(|unit| unit.is_priority).count() as u64)
            .sum();
        let coordinator = Arc::new(GlobalCoordinator::new(priority_files));
        info!(
            "Run {}: {} runnable jobs, {} priority files",
            run_id,
            runnable.len(),
            priority_files
        );

        let run_token = self.cancel.lock().clone();
        let run_cancel = run_token.child_token();
        let monitor_cancel = run_cancel.child_token();
        let monitor = if self.settings.enable_business_monitor && !self.settings.business_process_name.is_empty() {
            let monitor = BusinessProcessMonitor::new(
                self.probe.clone(),
                self.settings.business_process_name.clone(),
                Duration::from_millis(self.settings.business_check_interval_ms),
            );
            // Sample once up front so no transfer starts before the first tick
            let probe = self.probe.clone();
            let name = self.settings.business_process_name.clone();
            let detected = tokio::task::spawn_blocking(move || probe.is_running(&name))
                .await
                .unwrap_or(false);
            coordinator.set_business_paused(detected);
            Some(monitor.spawn(coordinator.clone(), monitor_cancel.clone()))
        } else {
            None
        };

        let ctx = RunContext {
            coordinator: coordinator.clone(),
            encryption: Arc::new(EncryptionGate::new(self.settings.clone())),
            log_sink: self.log_sink.clone(),
            state_sink: self.state_sink.clone(),
            cancel: run_cancel,
        };

        let mut slots = Vec::with_capacity(runnable.len());
        let mut handles = Vec::with_capacity(runnable.len());
        for (slot, job, plan) in runnable {
            slots.push((slot, job.name.clone()));
            let runner = JobRunner::new(job, ctx.clone());
            handles.push(tokio::spawn(runner.run(plan)));
        }

        for ((slot, name), result) in slots.into_iter().zip(join_all(handles).await) {
            reports[slot].outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Backup {:?} worker crashed: {}", name, e);
                    JobOutcome::Failed {
                        reason: format!("worker crashed: {}", e),
                    }
                }
            };
        }

        monitor_cancel.cancel();
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }

        if run_token.is_cancelled() {
            let mut current = self.cancel.lock();
            if current.is_cancelled() {
                *current = CancellationToken::new();
            }
        }

        if coordinator.priority_remaining() != 0 {
            warn!(
                "Run {} ended with {} priority files unaccounted for",
                run_id,
                coordinator.priority_remaining()
            );
        }

        let report = RunReport { run_id, jobs: reports };
        info!(
            "Run {} finished: {} of {} jobs ran",
            run_id,
            report.jobs_ran(),
            report.jobs.len()
        );
        report
    }

    /// Check preconditions and plan one job. Anything that keeps the job
    /// from running comes back as its final outcome.
    async fn prepare(&self, job_id: JobId) -> Result<(BackupJob, Vec<FileTransferUnit>), JobOutcome> {
        let Some(job) = self.jobs.job(job_id) else {
            warn!("Job {} is not configured, skipping", job_id);
            return Err(JobOutcome::Skipped(SkipReason::UnknownJob));
        };

        let skip = if !job.source_directory.is_dir() {
            Some(SkipReason::SourceMissing)
        } else if !job.target_directory.is_dir() {
            Some(SkipReason::TargetMissing)
        } else {
            None
        };
        if let Some(reason) = skip {
            warn!("Skipping backup {:?}: {}", job.name, reason);
            self.state_sink.update(JobProgress::idle(&job, JobRunState::Inactive));
            return Err(JobOutcome::Skipped(reason));
        }

        let planner = FileTransferPlanner::new(self.settings.clone());
        let planned_job = job.clone();
        let planned = tokio::task::spawn_blocking(move || planner.plan(&planned_job)).await;

        match planned {
            Ok(Ok(plan)) => Ok((job, plan)),
            Ok(Err(e)) => {
                error!("Planning backup {:?} failed: {}", job.name, e);
                self.state_sink.update(JobProgress::idle(&job, JobRunState::Failed));
                Err(JobOutcome::Failed { reason: e.to_string() })
            }
            Err(e) => {
                error!("Planning backup {:?} crashed: {}", job.name, e);
                self.state_sink.update(JobProgress::idle(&job, JobRunState::Failed));
                Err(JobOutcome::Failed {
                    reason: format!("planner crashed: {}", e),
                })
            }
        }
    }
}

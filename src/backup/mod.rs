pub mod business_monitor;
pub mod coordinator;
pub mod encryption;
pub mod orchestrator;
pub mod planner;
pub mod runner;
pub mod transfer;

pub use business_monitor::{BusinessProcessMonitor, ProcessProbe, SystemProcessProbe};
pub use coordinator::GlobalCoordinator;
pub use encryption::EncryptionGate;
pub use orchestrator::{ExecutionOrchestrator, RunReport};
pub use planner::FileTransferPlanner;
pub use runner::JobRunner;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub type JobId = u32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// Every file under the source is copied
    Full,
    /// Only files new or changed relative to the target are copied
    Differential,
}

/// A configured backup job. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupJob {
    pub id: JobId,
    pub name: String,
    pub source_directory: PathBuf,
    pub target_directory: PathBuf,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
}

/// One file to copy, derived per planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferUnit {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub size_bytes: u64,
    pub is_priority: bool,
    pub is_large: bool,
    pub needs_encryption: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobRunState {
    Inactive,
    Active,
    Completed,
    Failed,
}

impl fmt::Display for JobRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobRunState::Inactive => "inactive",
            JobRunState::Active => "active",
            JobRunState::Completed => "completed",
            JobRunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-file backup record. Negative times signal an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub backup_name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub file_size_bytes: u64,
    pub transfer_time_ms: i64,
    pub crypting_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Snapshot pushed to the state sink after every file and on every
/// job state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: JobId,
    pub job_name: String,
    pub state: JobRunState,
    pub files_total: u64,
    pub files_remaining: u64,
    pub bytes_total: u64,
    pub bytes_remaining: u64,
    pub current_source: Option<PathBuf>,
    pub current_target: Option<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    pub fn idle(job: &BackupJob, state: JobRunState) -> Self {
        Self {
            job_id: job.id,
            job_name: job.name.clone(),
            state,
            files_total: 0,
            files_remaining: 0,
            bytes_total: 0,
            bytes_remaining: 0,
            current_source: None,
            current_target: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownJob,
    SourceMissing,
    TargetMissing,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownJob => f.write_str("job is not configured"),
            SkipReason::SourceMissing => f.write_str("source directory does not exist"),
            SkipReason::TargetMissing => f.write_str("target directory does not exist"),
        }
    }
}

/// Final outcome of one requested job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every planned unit reached a terminal per-file outcome
    Completed { transferred: u64, failed: u64 },
    /// Enumeration failed before or during the run
    Failed { reason: String },
    /// The run was cancelled while the job was active
    Cancelled,
    /// The job never became active
    Skipped(SkipReason),
}

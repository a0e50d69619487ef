//! Backup execution engine.
//!
//! Runs backup jobs concurrently, one worker per job, while enforcing three
//! system-wide rules: priority extensions go first, large files move one at
//! a time, and nothing moves while the configured business process runs.
//! Matching files are handed to an external encryption tool, one
//! invocation at a time.
//!
//! Results leave the engine through two capabilities: a [`sinks::LogSink`]
//! receiving one [`backup::LogEntry`] per file and a [`sinks::StateSink`]
//! receiving live [`backup::JobProgress`].

pub mod backup;
pub mod error;
pub mod sinks;
pub mod storage;
pub mod utils;

pub use backup::{
    BackupJob, BackupType, ExecutionOrchestrator, JobId, JobOutcome, JobProgress, JobRunState, LogEntry, RunReport,
};
pub use error::{Cancelled, EngineError};
pub use sinks::{LogSink, StateBoard, StateSink};
pub use storage::{JobList, JobSource};
pub use utils::config::{Config, GeneralSettings};

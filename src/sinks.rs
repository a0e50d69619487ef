//! Capabilities the engine reports through. Concrete sinks are chosen once
//! at startup; the engine only ever holds `Arc<dyn LogSink>` and
//! `Arc<dyn StateSink>`.

use crate::backup::{JobId, JobProgress, LogEntry};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Receives one `LogEntry` per transferred file. Implementations absorb
/// their own failures; nothing is returned to the engine.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, entry: LogEntry);
}

/// Receives live job progress. Called at least once per file, so it must
/// not block.
pub trait StateSink: Send + Sync {
    fn update(&self, progress: JobProgress);
}

/// Keeps the latest progress of every job and re-publishes updates to
/// any number of live subscribers.
#[derive(Clone)]
pub struct StateBoard {
    jobs: Arc<RwLock<BTreeMap<JobId, JobProgress>>>,
    event_tx: broadcast::Sender<JobProgress>,
}

impl StateBoard {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            jobs: Arc::new(RwLock::new(BTreeMap::new())),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.event_tx.subscribe()
    }

    pub fn get(&self, job_id: JobId) -> Option<JobProgress> {
        self.jobs.read().get(&job_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<JobProgress> {
        self.jobs.read().values().cloned().collect()
    }
}

impl Default for StateBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSink for StateBoard {
    fn update(&self, progress: JobProgress) {
        self.jobs.write().insert(progress.job_id, progress.clone());
        // No subscribers is fine
        let _ = self.event_tx.send(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupJob, BackupType, JobRunState};

    fn job(id: JobId) -> BackupJob {
        BackupJob {
            id,
            name: format!("job-{}", id),
            source_directory: "/a".into(),
            target_directory: "/b".into(),
            backup_type: BackupType::Full,
        }
    }

    #[tokio::test]
    async fn keeps_latest_state_and_broadcasts() {
        let board = StateBoard::new();
        let mut rx = board.subscribe();

        board.update(JobProgress::idle(&job(1), JobRunState::Active));
        board.update(JobProgress::idle(&job(1), JobRunState::Completed));
        board.update(JobProgress::idle(&job(2), JobRunState::Inactive));

        assert_eq!(board.get(1).unwrap().state, JobRunState::Completed);
        assert_eq!(board.snapshot().len(), 2);

        assert_eq!(rx.recv().await.unwrap().state, JobRunState::Active);
        assert_eq!(rx.recv().await.unwrap().state, JobRunState::Completed);
        assert_eq!(rx.recv().await.unwrap().job_id, 2);
    }
}

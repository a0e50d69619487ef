use crate::backup::{BackupJob, JobId};
use crate::error::{EngineError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Read-only view of the configured jobs.
pub trait JobSource: Send + Sync {
    fn job(&self, id: JobId) -> Option<BackupJob>;

    /// All jobs, ordered by id.
    fn jobs(&self) -> Vec<BackupJob>;
}

/// Jobs keyed by their id, persisted as a JSON array.
#[derive(Debug, Clone, Default)]
pub struct JobList {
    jobs: BTreeMap<JobId, BackupJob>,
}

impl JobList {
    pub fn new(jobs: impl IntoIterator<Item = BackupJob>) -> Result<Self> {
        let mut list = BTreeMap::new();
        for job in jobs {
            let id = job.id;
            if list.insert(id, job).is_some() {
                return Err(EngineError::DuplicateJob(id));
            }
        }
        Ok(Self { jobs: list })
    }

    /// A missing file is an empty list.
    pub async fn load(path: &Path) -> Result<Self> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No job file at {}, starting empty", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(EngineError::io(path, e)),
        };

        let jobs: Vec<BackupJob> = serde_json::from_slice(&data)?;
        info!("Loaded {} jobs from {}", jobs.len(), path.display());
        Self::new(jobs)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::io(parent, e))?;
        }
        let jobs: Vec<&BackupJob> = self.jobs.values().collect();
        let data = serde_json::to_vec_pretty(&jobs)?;
        tokio::fs::write(path, data)
            .await
            .map_err(|e| EngineError::io(path, e))
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobSource for JobList {
    fn job(&self, id: JobId) -> Option<BackupJob> {
        self.jobs.get(&id).cloned()
    }

    fn jobs(&self) -> Vec<BackupJob> {
        self.jobs.values().cloned().collect()
    }
}

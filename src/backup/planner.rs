use super::{BackupJob, BackupType, FileTransferUnit};
use crate::error::{EngineError, Result};
use crate::utils::config::GeneralSettings;
use filetime::FileTime;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Turns a job into the ordered list of files to transfer.
pub struct FileTransferPlanner {
    settings: Arc<GeneralSettings>,
}

impl FileTransferPlanner {
    pub fn new(settings: Arc<GeneralSettings>) -> Self {
        Self { settings }
    }

    /// Enumerate the source tree recursively. Differential jobs keep only
    /// files that are new or differ in size or modification time from the
    /// target (modification time alone for files that get encrypted). Priority units come first; otherwise traversal order is kept.
    ///
    /// Any enumeration error fails the whole plan.
    pub fn plan(&self, job: &BackupJob) -> Result<Vec<FileTransferUnit>> {
        let source_root = &job.source_directory;
        if !source_root.is_dir() {
            return Err(EngineError::SourceNotFound(source_root.clone()));
        }

        info!("Planning backup {:?} from {}", job.name, source_root.display());

        let mut units = Vec::new();
        let mut unchanged = 0usize;

        for entry in WalkDir::new(source_root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| EngineError::Enumeration {
                path: source_root.clone(),
                source: e,
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| EngineError::Enumeration {
                path: entry.path().to_path_buf(),
                source: e,
            })?;

            let relative = entry
                .path()
                .strip_prefix(source_root)
                .unwrap_or_else(|_| entry.path());
            let target_path = job.target_directory.join(relative);

            let needs_encryption = self.settings.needs_encryption(entry.path());
            if job.backup_type == BackupType::Differential
                && is_unchanged(&metadata, &target_path, needs_encryption)
            {
                unchanged += 1;
                continue;
            }

            let source_path = entry.into_path();
            let size_bytes = metadata.len();
            units.push(FileTransferUnit {
                is_priority: self.settings.is_priority(&source_path),
                is_large: self.settings.is_large(size_bytes),
                needs_encryption,
                source_path,
                target_path,
                size_bytes,
            });
        }

        // Stable: traversal order survives within each class
        units.sort_by_key(|unit| !unit.is_priority);

        debug!(
            "Planned {} files for {:?} ({} unchanged skipped)",
            units.len(),
            job.name,
            unchanged
        );

        Ok(units)
    }
}

/// Encrypted targets are compared by modification time only: the tool
/// changes their size, and the runner stamps the source mtime back on.
fn is_unchanged(source: &fs::Metadata, target: &Path, encrypted: bool) -> bool {
    let target = match fs::metadata(target) {
        Ok(meta) if meta.is_file() => meta,
        _ => return false,
    };

    (encrypted || source.len() == target.len())
        && FileTime::from_last_modification_time(source) == FileTime::from_last_modification_time(&target)
}

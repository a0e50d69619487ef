use crate::backup::LogEntry;
use crate::sinks::LogSink;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Daily backup log: one JSON object per line in `<dir>/<YYYY-MM-DD>.jsonl`.
pub struct JsonLinesLog {
    dir: PathBuf,
    // One appender at a time
    write_lock: Mutex<()>,
}

impl JsonLinesLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, entry: &LogEntry) -> PathBuf {
        self.dir.join(format!("{}.jsonl", entry.timestamp.format("%Y-%m-%d")))
    }

    async fn write(&self, entry: &LogEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(entry))
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl LogSink for JsonLinesLog {
    async fn append(&self, entry: LogEntry) {
        if let Err(e) = self.write(&entry).await {
            warn!("Failed to write backup log to {}: {}", self.dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonLinesLog::new(dir.path().join("logs"));

        let entry = LogEntry {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 17, 10, 0, 0).unwrap(),
            backup_name: "docs".to_string(),
            source_path: "/a/x.txt".into(),
            target_path: "/b/x.txt".into(),
            file_size_bytes: 10,
            transfer_time_ms: 4,
            crypting_time_ms: -10,
            error_message: None,
        };
        log.append(entry.clone()).await;
        log.append(entry.clone()).await;

        let path = dir.path().join("logs/2024-05-17.jsonl");
        assert_eq!(log.path_for(&entry), path);
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: LogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, entry);
        assert!(lines[0].contains("\"cryptingTimeMs\":-10"));
        assert!(!lines[0].contains("errorMessage"));
    }
}

pub mod jobs;
pub mod log_file;

pub use jobs::{JobList, JobSource};
pub use log_file::JsonLinesLog;

use crate::backup::LogEntry;
use crate::error::Result;
use crate::sinks::LogSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// SQLite-backed backup log. Every entry is tagged with the session that
/// wrote it.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
    session_id: String,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file if it doesn't exist
        if !database_url.contains(":memory:") {
            let path = database_url.strip_prefix("sqlite://").unwrap_or(database_url);
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| crate::error::EngineError::io(parent, e))?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // One connection keeps `sqlite::memory:` a single database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            session_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backup_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                backup_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                source_path TEXT NOT NULL,
                target_path TEXT NOT NULL,
                file_size BIGINT NOT NULL,
                transfer_time_ms BIGINT NOT NULL,
                crypting_time_ms BIGINT NOT NULL,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_session ON backup_logs(session_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_backup ON backup_logs(backup_name)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn add_log(&self, entry: &LogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backup_logs (
                session_id, backup_name, timestamp, source_path, target_path,
                file_size, transfer_time_ms, crypting_time_ms, error_message
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&self.session_id)
        .bind(&entry.backup_name)
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.source_path.to_string_lossy().into_owned())
        .bind(entry.target_path.to_string_lossy().into_owned())
        .bind(entry.file_size_bytes as i64)
        .bind(entry.transfer_time_ms)
        .bind(entry.crypting_time_ms)
        .bind(entry.error_message.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent entries for one backup, newest first.
    pub async fn recent_logs(&self, backup_name: &str, limit: i64) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT backup_name, timestamp, source_path, target_path,
                   file_size, transfer_time_ms, crypting_time_ms, error_message
            FROM backup_logs
            WHERE backup_name = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(backup_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let logs = rows
            .into_iter()
            .map(|row| {
                let timestamp: String = row.get("timestamp");
                let source_path: String = row.get("source_path");
                let target_path: String = row.get("target_path");
                let file_size: i64 = row.get("file_size");
                LogEntry {
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    backup_name: row.get("backup_name"),
                    source_path: PathBuf::from(source_path),
                    target_path: PathBuf::from(target_path),
                    file_size_bytes: file_size.max(0) as u64,
                    transfer_time_ms: row.get("transfer_time_ms"),
                    crypting_time_ms: row.get("crypting_time_ms"),
                    error_message: row.get("error_message"),
                }
            })
            .collect();

        Ok(logs)
    }
}

#[async_trait]
impl LogSink for Storage {
    async fn append(&self, entry: LogEntry) {
        if let Err(e) = self.add_log(&entry).await {
            warn!("Failed to store log for {}: {}", entry.source_path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size: u64, crypting: i64) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            backup_name: name.to_string(),
            source_path: "/a/x.txt".into(),
            target_path: "/b/x.txt".into(),
            file_size_bytes: size,
            transfer_time_ms: 3,
            crypting_time_ms: crypting,
            error_message: (crypting < 0).then(|| "encryption failed".to_string()),
        }
    }

    #[tokio::test]
    async fn stores_and_reads_back_logs() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        storage.run_migrations().await.unwrap();

        storage.append(entry("docs", 10, 0)).await;
        storage.append(entry("docs", 20, -10)).await;
        storage.append(entry("photos", 30, 0)).await;

        let logs = storage.recent_logs("docs", 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].file_size_bytes, 20);
        assert_eq!(logs[0].crypting_time_ms, -10);
        assert_eq!(logs[0].error_message.as_deref(), Some("encryption failed"));
        assert_eq!(logs[1].error_message, None);

        assert_eq!(storage.recent_logs("docs", 1).await.unwrap().len(), 1);
    }
}

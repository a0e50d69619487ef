use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "backup-engine";
const ENV_PREFIX: &str = "BACKUP";

/// Process-wide settings consulted by the engine. Loaded once before a run
/// and shared read-only behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneralSettings {
    /// Extensions transferred before anything else, across all running jobs
    pub priority_extensions: HashSet<String>,

    /// Extensions handed to the encryption tool after copy
    pub crypto_extensions: HashSet<String>,

    /// Files at or above this size are serialized system-wide (0 = never)
    pub large_file_threshold_bytes: u64,

    /// Process whose presence pauses every transfer
    pub business_process_name: String,

    pub enable_business_monitor: bool,

    pub business_check_interval_ms: u64,

    /// Encryption executable; empty means not configured
    pub crypto_tool_path: String,

    /// Argument template, `{file}` is replaced by the absolute file path
    pub crypto_tool_args_template: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            priority_extensions: HashSet::new(),
            crypto_extensions: HashSet::new(),
            large_file_threshold_bytes: 100 * 1024 * 1024,
            business_process_name: String::new(),
            enable_business_monitor: false,
            business_check_interval_ms: 1000,
            crypto_tool_path: String::new(),
            crypto_tool_args_template: "{file}".to_string(),
        }
    }
}

impl GeneralSettings {
    /// Lower-case the extension sets and strip leading dots so lookups can
    /// compare against `Path::extension` directly.
    pub fn normalized(mut self) -> Self {
        self.priority_extensions = normalize_extensions(self.priority_extensions);
        self.crypto_extensions = normalize_extensions(self.crypto_extensions);
        self.business_process_name = self.business_process_name.trim().to_string();
        self
    }

    pub fn is_priority(&self, path: &Path) -> bool {
        has_extension_in(path, &self.priority_extensions)
    }

    pub fn needs_encryption(&self, path: &Path) -> bool {
        has_extension_in(path, &self.crypto_extensions)
    }

    pub fn is_large(&self, size: u64) -> bool {
        self.large_file_threshold_bytes > 0 && size >= self.large_file_threshold_bytes
    }
}

fn normalize_extensions(extensions: HashSet<String>) -> HashSet<String> {
    extensions
        .into_iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Lower-cased extension of `path`, `None` when it has none.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

fn has_extension_in(path: &Path, extensions: &HashSet<String>) -> bool {
    match extension_of(path) {
        Some(ext) => extensions.contains(&ext),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkKind {
    /// Daily JSON-lines files under `log_dir`
    Jsonl,
    /// `backup_logs` table in the SQLite database
    Sqlite,
    /// In-memory ring buffer, lost on exit
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: GeneralSettings,

    /// JSON file holding the configured backup jobs
    pub jobs_file: PathBuf,

    /// Directory for daily backup log files
    pub log_dir: PathBuf,

    pub log_sink: LogSinkKind,

    /// Database URL used by the sqlite log sink
    pub database_url: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("backup-engine");

        Self {
            settings: GeneralSettings::default(),
            jobs_file: data_dir.join("jobs.json"),
            log_dir: data_dir.join("logs"),
            log_sink: LogSinkKind::Jsonl,
            database_url: format!("sqlite://{}", data_dir.join("backup_logs.db").display()),
        }
    }
}

impl Config {
    /// Load config from an optional file overlaid by `BACKUP_*` environment
    /// variables (nested keys separated by `__`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path.to_path_buf()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let loaded = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        let mut config: Config = loaded
            .try_deserialize()
            .context("invalid configuration")?;
        config.settings = config.settings.normalized();

        Ok(config)
    }
}

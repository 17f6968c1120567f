// dumptool/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATABASE_PATH: &str = "/data/app/app.db";
pub const DEFAULT_BACKUP_DIR: &str = "/data/backups";
pub const DEFAULT_TICK_SECONDS: u64 = 10;
pub const DEFAULT_JOB_TIMEOUT_MINUTES: u64 = 30;
pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub const ENV_DATABASE_PATH: &str = "SQLITE_PATH";
pub const ENV_BACKUP_DIR: &str = "BACKUP_DIR";
pub const ENV_TICK_SECONDS: &str = "DUMPTOOL_TICK_SECONDS";
pub const ENV_ENCRYPTION_KEY: &str = "APP_ENC_KEY";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonSchedulerOptions {
    pub tick_interval_secs: Option<u64>,
    pub job_timeout_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDumpOptions {
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub database_path: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub scheduler: Option<JsonSchedulerOptions>,
    pub dump: Option<JsonDumpOptions>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub job_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpConfig {
    pub backup_dir: PathBuf,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub dump: DumpConfig,
    pub scheduler: SchedulerConfig,
    /// Base64 AES-256 key; required only by commands that touch credentials.
    pub encryption_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            dump: DumpConfig {
                backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
                batch_size: DEFAULT_BATCH_SIZE,
            },
            scheduler: SchedulerConfig {
                tick_interval: Duration::from_secs(DEFAULT_TICK_SECONDS),
                job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_MINUTES * 60),
            },
            encryption_key: None,
        }
    }
}

impl AppConfig {
    /// Reads `config_path` if it exists, then applies environment overrides
    /// from the process environment.
    pub fn load(config_path: &Path) -> Result<Self> {
        let raw = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
            serde_json::from_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            RawJsonConfig::default()
        };
        Self::from_raw(raw, |key| std::env::var(key).ok())
    }

    /// Builds the validated config; `lookup` supplies environment values so
    /// overrides can be exercised without touching the real environment.
    pub fn from_raw<F>(raw: RawJsonConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_path = env(ENV_DATABASE_PATH)
            .map(PathBuf::from)
            .or(raw.database_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));
        let backup_dir = env(ENV_BACKUP_DIR)
            .map(PathBuf::from)
            .or(raw.backup_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));

        if database_path.as_os_str().is_empty() {
            anyhow::bail!("database_path cannot be empty");
        }
        if backup_dir.as_os_str().is_empty() {
            anyhow::bail!("backup_dir cannot be empty");
        }

        let scheduler = raw.scheduler.unwrap_or_default();
        let tick_secs = match env(ENV_TICK_SECONDS) {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a whole number of seconds, got '{}'", ENV_TICK_SECONDS, v))?,
            None => scheduler.tick_interval_secs.unwrap_or(DEFAULT_TICK_SECONDS),
        };
        if tick_secs == 0 {
            anyhow::bail!("scheduler tick interval must be at least one second");
        }
        let timeout_minutes = scheduler.job_timeout_minutes.unwrap_or(DEFAULT_JOB_TIMEOUT_MINUTES);
        if timeout_minutes == 0 {
            anyhow::bail!("scheduler job_timeout_minutes must be positive");
        }

        let batch_size = raw
            .dump
            .and_then(|d| d.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            anyhow::bail!("dump batch_size must be positive");
        }

        Ok(AppConfig {
            database_path,
            dump: DumpConfig { backup_dir, batch_size },
            scheduler: SchedulerConfig {
                tick_interval: Duration::from_secs(tick_secs),
                job_timeout: Duration::from_secs(timeout_minutes * 60),
            },
            encryption_key: env(ENV_ENCRYPTION_KEY),
        })
    }

    pub fn require_encryption_key(&self) -> Result<&str> {
        self.encryption_key
            .as_deref()
            .with_context(|| format!("{} must be set (generate one with `dumptool keygen`)", ENV_ENCRYPTION_KEY))
    }
}

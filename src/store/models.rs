// dumptool/src/store/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::CredentialCipher;
use crate::errors::{AppError, Result};
use crate::schedule::recurrence::{ScheduleConfig, next_run_after};

/// Which databases of a target get dumped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "databases", rename_all = "lowercase")]
pub enum DatabaseSelection {
    /// Every schema discovered at dump time, minus the system schemas.
    All,
    /// An explicit, ordered list.
    Selected(Vec<String>),
}

impl DatabaseSelection {
    pub fn mode(&self) -> &'static str {
        match self {
            DatabaseSelection::All => "all",
            DatabaseSelection::Selected(_) => "selected",
        }
    }

    /// Rebuilds the selection from its persisted form: the mode column plus
    /// the JSON list column.
    pub fn from_parts(mode: &str, selected_json: &str) -> Result<Self> {
        match mode {
            "all" => Ok(DatabaseSelection::All),
            "selected" => {
                if selected_json.trim().is_empty() {
                    return Ok(DatabaseSelection::Selected(Vec::new()));
                }
                let databases: Vec<String> = serde_json::from_str(selected_json)?;
                Ok(DatabaseSelection::Selected(databases))
            }
            other => Err(AppError::InvalidInput(format!(
                "invalid database mode: {}",
                other
            ))),
        }
    }

    /// The JSON list column value ("" for `All`).
    pub fn selected_json(&self) -> Result<String> {
        match self {
            DatabaseSelection::All => Ok(String::new()),
            DatabaseSelection::Selected(dbs) => Ok(serde_json::to_string(dbs)?),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip)]
    pub password_enc: String,
    pub comment: String,
    pub database_selection: DatabaseSelection,
    pub auto_compress: bool,
    pub retention_days: i64,
    /// Legacy single-field daily schedule ("HH:MM"). Only read by the
    /// one-time migration into schedule jobs.
    pub schedule_time: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Target {
    pub fn new(name: &str, host: &str, port: u16, user: &str, password_enc: &str) -> Self {
        let now = Utc::now();
        Target {
            id: 0,
            name: name.to_string(),
            host: host.to_string(),
            port,
            user: user.to_string(),
            password_enc: password_enc.to_string(),
            comment: String::new(),
            database_selection: DatabaseSelection::All,
            auto_compress: true,
            retention_days: 30,
            schedule_time: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Edits to an existing target. `None` leaves a field unchanged; an empty
/// password keeps the stored one.
#[derive(Debug, Clone, Default)]
pub struct TargetUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub comment: Option<String>,
    pub database_selection: Option<DatabaseSelection>,
    pub auto_compress: Option<bool>,
    pub retention_days: Option<i64>,
}

impl Target {
    pub fn apply(&mut self, update: TargetUpdate, cipher: &dyn CredentialCipher) -> Result<()> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::InvalidInput("target name cannot be empty".to_string()));
        }
        if let Some(days) = update.retention_days.filter(|d| *d < 0) {
            return Err(AppError::InvalidInput(format!("retention days cannot be negative: {}", days)));
        }
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(days) = update.retention_days {
            self.retention_days = days;
        }
        if let Some(password) = update.password.filter(|p| !p.is_empty()) {
            self.password_enc = cipher.encrypt(&password)?;
        }
        if let Some(host) = update.host {
            self.host = host;
        }
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(user) = update.user {
            self.user = user;
        }
        if let Some(comment) = update.comment {
            self.comment = comment;
        }
        if let Some(selection) = update.database_selection {
            self.database_selection = selection;
        }
        if let Some(compress) = update.auto_compress {
            self.auto_compress = compress;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Running,
    Success,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Running => "running",
            BackupStatus::Success => "success",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(BackupStatus::Running),
            "success" => Ok(BackupStatus::Success),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(AppError::InvalidInput(format!("unknown backup status: {}", other))),
        }
    }
}

/// One dump artifact for one (target, database) pair.
#[derive(Debug, Clone, Serialize)]
pub struct Backup {
    pub id: i64,
    pub target_id: i64,
    /// Empty for artifacts written before per-database backups existed.
    pub database_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub size_bytes: i64,
    pub status: BackupStatus,
    pub file_path: String,
    pub notes: String,
}

impl Backup {
    pub fn running(target_id: i64, database_name: &str, started_at: DateTime<Utc>) -> Self {
        Backup {
            id: 0,
            target_id,
            database_name: database_name.to_string(),
            started_at,
            finished_at: None,
            size_bytes: 0,
            status: BackupStatus::Running,
            file_path: String::new(),
            notes: String::new(),
        }
    }

    pub fn mark_success(&mut self, file_path: &str, size_bytes: i64) {
        self.status = BackupStatus::Success;
        self.finished_at = Some(Utc::now());
        self.file_path = file_path.to_string();
        self.size_bytes = size_bytes;
    }

    /// A failed backup never carries a file path, even if a partial
    /// artifact was left on disk.
    pub fn mark_failed(&mut self, notes: impl Into<String>) {
        self.status = BackupStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.file_path = String::new();
        self.notes = notes.into();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(AppError::InvalidInput(format!("unknown job status: {}", other))),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Per-job backup options, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOptions {
    #[serde(default = "default_true")]
    pub compress: bool,
    #[serde(default = "default_true")]
    pub include_structure: bool,
    #[serde(default = "default_true")]
    pub include_data: bool,
    /// Overrides the target's database selection when non-empty.
    #[serde(default)]
    pub databases: Vec<String>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        BackupOptions {
            compress: true,
            include_structure: true,
            include_data: true,
            databases: Vec::new(),
        }
    }
}

impl BackupOptions {
    /// Options equivalent to a plain manual backup of the target.
    pub fn for_target(target: &Target) -> Self {
        BackupOptions {
            compress: target.auto_compress,
            ..BackupOptions::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleJob {
    pub id: i64,
    pub target_id: i64,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub schedule: ScheduleConfig,
    pub backup_options: BackupOptions,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: JobStatus,
    pub last_run_notes: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleJob {
    pub fn new(target_id: i64, name: &str, schedule: ScheduleConfig, backup_options: BackupOptions) -> Self {
        let now = Utc::now();
        ScheduleJob {
            id: 0,
            target_id,
            name: name.to_string(),
            description: String::new(),
            is_active: true,
            schedule,
            backup_options,
            last_run_at: None,
            last_run_status: JobStatus::Pending,
            last_run_notes: String::new(),
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `update` and recomputes the next run from `now`, whether or
    /// not the schedule changed.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(schedule) = update.schedule {
            self.schedule = schedule;
        }
        if let Some(options) = update.backup_options {
            self.backup_options = options;
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
        self.next_run_at = next_run_after(&self.schedule, now);
        self.updated_at = now;
    }
}

/// Edits to an existing schedule job; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<ScheduleConfig>,
    pub backup_options: Option<BackupOptions>,
    pub is_active: Option<bool>,
}

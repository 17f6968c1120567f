// dumptool/src/store/sqlite.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::{info, warn};

use super::Repository;
use super::models::{Backup, BackupOptions, BackupStatus, DatabaseSelection, JobStatus, ScheduleJob, Target};
use crate::errors::{AppError, Result};
use crate::schedule::recurrence::ScheduleConfig;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS targets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        host TEXT NOT NULL,
        port INTEGER NOT NULL DEFAULT 3306,
        user TEXT NOT NULL,
        password_enc TEXT NOT NULL,
        comment TEXT NOT NULL DEFAULT '',
        schedule_time TEXT NOT NULL DEFAULT '',
        retention_days INTEGER NOT NULL DEFAULT 30,
        auto_compress BOOLEAN NOT NULL DEFAULT 1,
        database_mode TEXT NOT NULL DEFAULT 'all',
        selected_databases TEXT NOT NULL DEFAULT '',
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS backups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_id INTEGER NOT NULL,
        database_name TEXT NOT NULL DEFAULT '',
        started_at DATETIME NOT NULL,
        finished_at DATETIME,
        size_bytes INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'running',
        file_path TEXT NOT NULL DEFAULT '',
        notes TEXT NOT NULL DEFAULT '',
        FOREIGN KEY (target_id) REFERENCES targets(id) ON DELETE CASCADE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS schedule_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        is_active BOOLEAN NOT NULL DEFAULT 1,
        schedule_config TEXT NOT NULL,
        backup_options TEXT NOT NULL,
        last_run_at DATETIME,
        last_run_status TEXT NOT NULL DEFAULT 'pending',
        last_run_notes TEXT NOT NULL DEFAULT '',
        next_run_at DATETIME,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        FOREIGN KEY (target_id) REFERENCES targets(id) ON DELETE CASCADE
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_backups_target ON backups(target_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_active ON schedule_jobs(is_active)",
];

const TARGET_COLUMNS: &str = "id, name, host, port, user, password_enc, comment, schedule_time, \
     retention_days, auto_compress, database_mode, selected_databases, created_at, updated_at";

const BACKUP_COLUMNS: &str =
    "id, target_id, database_name, started_at, finished_at, size_bytes, status, file_path, notes";

const JOB_COLUMNS: &str = "id, target_id, name, description, is_active, schedule_config, backup_options, \
     last_run_at, last_run_status, last_run_notes, next_run_at, created_at, updated_at";

/// SQLite-backed repository holding the application's own state.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Opens (creating if needed) the database file and applies the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AppError::connection(format!("failed to open {}", path.display()), e))?;

        let repo = SqliteRepository { pool };
        repo.init_schema().await?;
        info!("📂 Application database ready at {}", path.display());
        Ok(repo)
    }

    /// Private in-memory database; a single connection keeps it alive.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let repo = SqliteRepository { pool };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn target_from_row(row: &SqliteRow) -> Result<Target> {
    let mode: String = row.try_get("database_mode")?;
    let selected: String = row.try_get("selected_databases")?;
    let port: i64 = row.try_get("port")?;
    Ok(Target {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        host: row.try_get("host")?,
        port: u16::try_from(port)
            .map_err(|_| AppError::InvalidInput(format!("stored port out of range: {}", port)))?,
        user: row.try_get("user")?,
        password_enc: row.try_get("password_enc")?,
        comment: row.try_get("comment")?,
        database_selection: DatabaseSelection::from_parts(&mode, &selected)?,
        auto_compress: row.try_get("auto_compress")?,
        retention_days: row.try_get("retention_days")?,
        schedule_time: row.try_get("schedule_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn backup_from_row(row: &SqliteRow) -> Result<Backup> {
    let status: String = row.try_get("status")?;
    Ok(Backup {
        id: row.try_get("id")?,
        target_id: row.try_get("target_id")?,
        database_name: row.try_get("database_name")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        size_bytes: row.try_get("size_bytes")?,
        status: BackupStatus::parse(&status)?,
        file_path: row.try_get("file_path")?,
        notes: row.try_get("notes")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<ScheduleJob> {
    let schedule: String = row.try_get("schedule_config")?;
    let options: String = row.try_get("backup_options")?;
    let status: String = row.try_get("last_run_status")?;
    Ok(ScheduleJob {
        id: row.try_get("id")?,
        target_id: row.try_get("target_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        is_active: row.try_get("is_active")?,
        schedule: serde_json::from_str::<ScheduleConfig>(&schedule)?,
        backup_options: serde_json::from_str::<BackupOptions>(&options)?,
        last_run_at: row.try_get("last_run_at")?,
        last_run_status: JobStatus::parse(&status)?,
        last_run_notes: row.try_get("last_run_notes")?,
        next_run_at: row.try_get("next_run_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn affected_or_not_found(rows: u64, what: &str, id: i64) -> Result<()> {
    if rows == 0 {
        return Err(AppError::NotFound(format!("{} {} not found", what, id)));
    }
    Ok(())
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_target(&self, target: &mut Target) -> Result<()> {
        let now = Utc::now();
        target.created_at = now;
        target.updated_at = now;
        let result = sqlx::query(
            "INSERT INTO targets (name, host, port, user, password_enc, comment, schedule_time, \
             retention_days, auto_compress, database_mode, selected_databases, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&target.name)
        .bind(&target.host)
        .bind(i64::from(target.port))
        .bind(&target.user)
        .bind(&target.password_enc)
        .bind(&target.comment)
        .bind(&target.schedule_time)
        .bind(target.retention_days)
        .bind(target.auto_compress)
        .bind(target.database_selection.mode())
        .bind(target.database_selection.selected_json()?)
        .bind(target.created_at)
        .bind(target.updated_at)
        .execute(&self.pool)
        .await?;
        target.id = result.last_insert_rowid();
        Ok(())
    }

    async fn get_target(&self, id: i64) -> Result<Target> {
        let row = sqlx::query(&format!("SELECT {} FROM targets WHERE id = ?", TARGET_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("target {} not found", id)))?;
        target_from_row(&row)
    }

    async fn list_targets(&self) -> Result<Vec<Target>> {
        let rows = sqlx::query(&format!("SELECT {} FROM targets ORDER BY name", TARGET_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(target_from_row).collect()
    }

    async fn update_target(&self, target: &Target) -> Result<()> {
        let result = sqlx::query(
            "UPDATE targets SET name = ?, host = ?, port = ?, user = ?, password_enc = ?, comment = ?, \
             schedule_time = ?, retention_days = ?, auto_compress = ?, database_mode = ?, \
             selected_databases = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&target.name)
        .bind(&target.host)
        .bind(i64::from(target.port))
        .bind(&target.user)
        .bind(&target.password_enc)
        .bind(&target.comment)
        .bind(&target.schedule_time)
        .bind(target.retention_days)
        .bind(target.auto_compress)
        .bind(target.database_selection.mode())
        .bind(target.database_selection.selected_json()?)
        .bind(Utc::now())
        .bind(target.id)
        .execute(&self.pool)
        .await?;
        affected_or_not_found(result.rows_affected(), "target", target.id)
    }

    async fn delete_target(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM targets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        affected_or_not_found(result.rows_affected(), "target", id)
    }

    async fn create_backup(&self, backup: &mut Backup) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO backups (target_id, database_name, started_at, finished_at, size_bytes, status, file_path, notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(backup.target_id)
        .bind(&backup.database_name)
        .bind(backup.started_at)
        .bind(backup.finished_at)
        .bind(backup.size_bytes)
        .bind(backup.status.as_str())
        .bind(&backup.file_path)
        .bind(&backup.notes)
        .execute(&self.pool)
        .await?;
        backup.id = result.last_insert_rowid();
        Ok(())
    }

    async fn get_backup(&self, id: i64) -> Result<Backup> {
        let row = sqlx::query(&format!("SELECT {} FROM backups WHERE id = ?", BACKUP_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("backup {} not found", id)))?;
        backup_from_row(&row)
    }

    async fn update_backup(&self, backup: &Backup) -> Result<()> {
        let result = sqlx::query(
            "UPDATE backups SET database_name = ?, finished_at = ?, size_bytes = ?, status = ?, file_path = ?, notes = ? \
             WHERE id = ?",
        )
        .bind(&backup.database_name)
        .bind(backup.finished_at)
        .bind(backup.size_bytes)
        .bind(backup.status.as_str())
        .bind(&backup.file_path)
        .bind(&backup.notes)
        .bind(backup.id)
        .execute(&self.pool)
        .await?;
        affected_or_not_found(result.rows_affected(), "backup", backup.id)
    }

    async fn list_backups_by_target(&self, target_id: i64) -> Result<Vec<Backup>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM backups WHERE target_id = ? ORDER BY started_at DESC, id DESC",
            BACKUP_COLUMNS
        ))
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(backup_from_row).collect()
    }

    async fn list_backups_older_than(&self, target_id: i64, cutoff: DateTime<Utc>) -> Result<Vec<Backup>> {
        // Timestamps are stored as text with variable precision, so the
        // comparison happens here instead of in SQL.
        let backups = self.list_backups_by_target(target_id).await?;
        Ok(backups.into_iter().filter(|b| b.started_at < cutoff).collect())
    }

    async fn list_running_backups(&self) -> Result<Vec<Backup>> {
        let rows = sqlx::query(&format!("SELECT {} FROM backups WHERE status = 'running'", BACKUP_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(backup_from_row).collect()
    }

    async fn delete_backup(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM backups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        affected_or_not_found(result.rows_affected(), "backup", id)
    }

    async fn create_job(&self, job: &mut ScheduleJob) -> Result<()> {
        let now = Utc::now();
        job.created_at = now;
        job.updated_at = now;
        let result = sqlx::query(
            "INSERT INTO schedule_jobs (target_id, name, description, is_active, schedule_config, backup_options, \
             last_run_at, last_run_status, last_run_notes, next_run_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.target_id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(job.is_active)
        .bind(serde_json::to_string(&job.schedule)?)
        .bind(serde_json::to_string(&job.backup_options)?)
        .bind(job.last_run_at)
        .bind(job.last_run_status.as_str())
        .bind(&job.last_run_notes)
        .bind(job.next_run_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        job.id = result.last_insert_rowid();
        Ok(())
    }

    async fn get_job(&self, id: i64) -> Result<ScheduleJob> {
        let row = sqlx::query(&format!("SELECT {} FROM schedule_jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("schedule job {} not found", id)))?;
        job_from_row(&row)
    }

    async fn list_jobs(&self) -> Result<Vec<ScheduleJob>> {
        let rows = sqlx::query(&format!("SELECT {} FROM schedule_jobs ORDER BY name", JOB_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn list_active_jobs(&self) -> Result<Vec<ScheduleJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM schedule_jobs WHERE is_active = 1 ORDER BY id",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        // One undecodable job must not stall every other job.
        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            match job_from_row(row) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    let id: i64 = row.try_get("id").unwrap_or_default();
                    warn!("⚠️ Skipping schedule job {} with unreadable configuration: {}", id, e);
                }
            }
        }
        Ok(jobs)
    }

    async fn update_job(&self, job: &ScheduleJob) -> Result<()> {
        let result = sqlx::query(
            "UPDATE schedule_jobs SET target_id = ?, name = ?, description = ?, is_active = ?, schedule_config = ?, \
             backup_options = ?, next_run_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(job.target_id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(job.is_active)
        .bind(serde_json::to_string(&job.schedule)?)
        .bind(serde_json::to_string(&job.backup_options)?)
        .bind(job.next_run_at)
        .bind(Utc::now())
        .bind(job.id)
        .execute(&self.pool)
        .await?;
        affected_or_not_found(result.rows_affected(), "schedule job", job.id)
    }

    async fn update_job_run_status(
        &self,
        id: i64,
        status: JobStatus,
        notes: &str,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE schedule_jobs SET last_run_status = ?, last_run_notes = ?, \
             last_run_at = COALESCE(?, last_run_at), next_run_at = COALESCE(?, next_run_at), updated_at = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(last_run_at)
        .bind(next_run_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        affected_or_not_found(result.rows_affected(), "schedule job", id)
    }

    async fn delete_job(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM schedule_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        affected_or_not_found(result.rows_affected(), "schedule job", id)
    }
}

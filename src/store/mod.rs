// dumptool/src/store/mod.rs
pub mod models;
pub(crate) mod sqlite;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use models::{Backup, JobStatus, ScheduleJob, Target};

pub use sqlite::SqliteRepository;

/// Durable store for targets, backups and schedule jobs.
///
/// There is no optimistic locking: concurrent writers of the same row race
/// and the last write wins.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_target(&self, target: &mut Target) -> Result<()>;
    async fn get_target(&self, id: i64) -> Result<Target>;
    async fn list_targets(&self) -> Result<Vec<Target>>;
    async fn update_target(&self, target: &Target) -> Result<()>;
    /// Also removes the target's backups and jobs.
    async fn delete_target(&self, id: i64) -> Result<()>;

    async fn create_backup(&self, backup: &mut Backup) -> Result<()>;
    async fn get_backup(&self, id: i64) -> Result<Backup>;
    async fn update_backup(&self, backup: &Backup) -> Result<()>;
    /// Newest first.
    async fn list_backups_by_target(&self, target_id: i64) -> Result<Vec<Backup>>;
    async fn list_backups_older_than(&self, target_id: i64, cutoff: DateTime<Utc>) -> Result<Vec<Backup>>;
    async fn list_running_backups(&self) -> Result<Vec<Backup>>;
    async fn delete_backup(&self, id: i64) -> Result<()>;

    async fn create_job(&self, job: &mut ScheduleJob) -> Result<()>;
    async fn get_job(&self, id: i64) -> Result<ScheduleJob>;
    async fn list_jobs(&self) -> Result<Vec<ScheduleJob>>;
    /// Jobs the scheduler evaluates on every tick.
    async fn list_active_jobs(&self) -> Result<Vec<ScheduleJob>>;
    async fn update_job(&self, job: &ScheduleJob) -> Result<()>;
    async fn update_job_run_status(
        &self,
        id: i64,
        status: JobStatus,
        notes: &str,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn delete_job(&self, id: i64) -> Result<()>;
}

// dumptool/src/store/memory.rs
//! In-process repository used by engine tests.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::Repository;
use super::models::{Backup, BackupStatus, JobStatus, ScheduleJob, Target};
use crate::errors::{AppError, Result};

#[derive(Default)]
struct Tables {
    next_id: i64,
    targets: BTreeMap<i64, Target>,
    backups: BTreeMap<i64, Backup>,
    jobs: BTreeMap<i64, ScheduleJob>,
    /// Jobs whose run-status writes fail, to simulate a storage error.
    broken_jobs: BTreeSet<i64>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn break_status_updates(&self, job_id: i64) {
        self.lock().broken_jobs.insert(job_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("memory repository poisoned")
    }
}

fn not_found(what: &str, id: i64) -> AppError {
    AppError::NotFound(format!("{} {} not found", what, id))
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_target(&self, target: &mut Target) -> Result<()> {
        let mut t = self.lock();
        target.id = t.allocate_id();
        t.targets.insert(target.id, target.clone());
        Ok(())
    }

    async fn get_target(&self, id: i64) -> Result<Target> {
        self.lock().targets.get(&id).cloned().ok_or_else(|| not_found("target", id))
    }

    async fn list_targets(&self) -> Result<Vec<Target>> {
        Ok(self.lock().targets.values().cloned().collect())
    }

    async fn update_target(&self, target: &Target) -> Result<()> {
        let mut t = self.lock();
        let slot = t.targets.get_mut(&target.id).ok_or_else(|| not_found("target", target.id))?;
        *slot = target.clone();
        Ok(())
    }

    async fn delete_target(&self, id: i64) -> Result<()> {
        let mut t = self.lock();
        t.targets.remove(&id).ok_or_else(|| not_found("target", id))?;
        t.backups.retain(|_, b| b.target_id != id);
        t.jobs.retain(|_, j| j.target_id != id);
        Ok(())
    }

    async fn create_backup(&self, backup: &mut Backup) -> Result<()> {
        let mut t = self.lock();
        backup.id = t.allocate_id();
        t.backups.insert(backup.id, backup.clone());
        Ok(())
    }

    async fn get_backup(&self, id: i64) -> Result<Backup> {
        self.lock().backups.get(&id).cloned().ok_or_else(|| not_found("backup", id))
    }

    async fn update_backup(&self, backup: &Backup) -> Result<()> {
        let mut t = self.lock();
        let slot = t.backups.get_mut(&backup.id).ok_or_else(|| not_found("backup", backup.id))?;
        *slot = backup.clone();
        Ok(())
    }

    async fn list_backups_by_target(&self, target_id: i64) -> Result<Vec<Backup>> {
        let mut backups: Vec<Backup> = self
            .lock()
            .backups
            .values()
            .filter(|b| b.target_id == target_id)
            .cloned()
            .collect();
        backups.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(backups)
    }

    async fn list_backups_older_than(&self, target_id: i64, cutoff: DateTime<Utc>) -> Result<Vec<Backup>> {
        let backups = self.list_backups_by_target(target_id).await?;
        Ok(backups.into_iter().filter(|b| b.started_at < cutoff).collect())
    }

    async fn list_running_backups(&self) -> Result<Vec<Backup>> {
        Ok(self
            .lock()
            .backups
            .values()
            .filter(|b| b.status == BackupStatus::Running)
            .cloned()
            .collect())
    }

    async fn delete_backup(&self, id: i64) -> Result<()> {
        self.lock().backups.remove(&id).ok_or_else(|| not_found("backup", id))?;
        Ok(())
    }

    async fn create_job(&self, job: &mut ScheduleJob) -> Result<()> {
        let mut t = self.lock();
        job.id = t.allocate_id();
        t.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: i64) -> Result<ScheduleJob> {
        self.lock().jobs.get(&id).cloned().ok_or_else(|| not_found("schedule job", id))
    }

    async fn list_jobs(&self) -> Result<Vec<ScheduleJob>> {
        Ok(self.lock().jobs.values().cloned().collect())
    }

    async fn list_active_jobs(&self) -> Result<Vec<ScheduleJob>> {
        Ok(self.lock().jobs.values().filter(|j| j.is_active).cloned().collect())
    }

    async fn update_job(&self, job: &ScheduleJob) -> Result<()> {
        let mut t = self.lock();
        let slot = t.jobs.get_mut(&job.id).ok_or_else(|| not_found("schedule job", job.id))?;
        *slot = job.clone();
        Ok(())
    }

    async fn update_job_run_status(
        &self,
        id: i64,
        status: JobStatus,
        notes: &str,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut t = self.lock();
        if t.broken_jobs.contains(&id) {
            return Err(AppError::Config(format!("status write for job {} rejected", id)));
        }
        let job = t.jobs.get_mut(&id).ok_or_else(|| not_found("schedule job", id))?;
        job.last_run_status = status;
        job.last_run_notes = notes.to_string();
        if last_run_at.is_some() {
            job.last_run_at = last_run_at;
        }
        if next_run_at.is_some() {
            job.next_run_at = next_run_at;
        }
        Ok(())
    }

    async fn delete_job(&self, id: i64) -> Result<()> {
        self.lock().jobs.remove(&id).ok_or_else(|| not_found("schedule job", id))?;
        Ok(())
    }
}

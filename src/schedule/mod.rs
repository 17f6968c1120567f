// dumptool/src/schedule/mod.rs
pub mod legacy;
pub mod recurrence;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::backup::Dumper;
use crate::config::SchedulerConfig;
use crate::errors::{AppError, Result};
use crate::store::Repository;
use crate::store::models::{BackupStatus, JobStatus, ScheduleJob};
use recurrence::next_run_after;

const INTERRUPTED_NOTE: &str = "Interrupted: the process stopped while this was running";

/// Evaluates active schedule jobs on a fixed tick and runs the due ones.
pub struct Scheduler {
    repo: Arc<dyn Repository>,
    dumper: Dumper,
    config: SchedulerConfig,
}

/// Returned by `Scheduler::start`; dropping it leaves the loop running.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ends the tick loop. Jobs already dispatched keep running to completion.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
    }
}

/// A job is due once its next run time has passed, unless a run is already
/// in progress.
pub fn is_due(job: &ScheduleJob, now: DateTime<Utc>) -> bool {
    job.last_run_status != JobStatus::Running && job.next_run_at.is_some_and(|next| next <= now)
}

impl Scheduler {
    pub fn new(repo: Arc<dyn Repository>, dumper: Dumper, config: SchedulerConfig) -> Self {
        Scheduler { repo, dumper, config }
    }

    /// Spawns the tick loop. Runs startup recovery first, then ticks
    /// immediately and every `tick_interval` after that.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            match self.recover_interrupted().await {
                Ok(0) => {}
                Ok(n) => warn!("Marked {} interrupted run(s) as failed", n),
                Err(e) => error!("❌ Startup recovery failed: {}", e),
            }

            let mut ticker = tokio::time::interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?self.config.tick_interval, "⏰ Job scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick(Utc::now()).await {
                            error!("Failed to evaluate schedule jobs: {}", e);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Job scheduler stopped");
        });
        SchedulerHandle { shutdown, task }
    }

    /// One evaluation pass. Jobs without a next run time get one; due jobs
    /// are marked running and dispatched on their own task, whose handles
    /// are returned. A storage error on one job does not stop the others.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<Vec<JoinHandle<JobStatus>>> {
        let jobs = self.repo.list_active_jobs().await?;
        let mut dispatched = Vec::new();

        for job in jobs {
            if job.next_run_at.is_none() {
                let next = next_run_after(&job.schedule, now);
                if next.is_none() {
                    warn!(job_id = job.id, "Could not compute a next run time");
                    continue;
                }
                if let Err(e) = self
                    .repo
                    .update_job_run_status(job.id, job.last_run_status, &job.last_run_notes, None, next)
                    .await
                {
                    error!(job_id = job.id, "Failed to store next run time: {}", e);
                }
                continue;
            }
            if !is_due(&job, now) {
                continue;
            }

            info!(job_id = job.id, job = %job.name, "🚀 Starting scheduled job");
            let job_id = job.id;
            match self.dispatch(job, now).await {
                Ok(handle) => dispatched.push(handle),
                Err(e) => error!(job_id, "❌ Could not start job: {}", e),
            }
        }
        Ok(dispatched)
    }

    /// Manual trigger. Refuses a job whose last run is still marked running;
    /// this is a status check, not a lock.
    pub async fn run_job_now(self: &Arc<Self>, job_id: i64) -> Result<JoinHandle<JobStatus>> {
        let job = self.repo.get_job(job_id).await?;
        if job.last_run_status == JobStatus::Running {
            return Err(AppError::InvalidInput(format!("job {} is already running", job_id)));
        }
        info!(job_id, job = %job.name, "🚀 Starting job on demand");
        self.dispatch(job, Utc::now()).await
    }

    async fn dispatch(self: &Arc<Self>, job: ScheduleJob, started_at: DateTime<Utc>) -> Result<JoinHandle<JobStatus>> {
        self.repo
            .update_job_run_status(job.id, JobStatus::Running, "Job execution started", Some(started_at), None)
            .await?;
        let scheduler = Arc::clone(self);
        Ok(tokio::spawn(async move { scheduler.execute_job(job, started_at).await }))
    }

    async fn execute_job(&self, job: ScheduleJob, started_at: DateTime<Utc>) -> JobStatus {
        let deadline = Instant::now() + self.config.job_timeout;
        let (status, notes) = match self
            .dumper
            .run_backup(job.target_id, &job.backup_options, Some(deadline))
            .await
        {
            Ok(backups) => {
                let failed: Vec<String> = backups
                    .iter()
                    .filter(|b| b.status != BackupStatus::Success)
                    .map(|b| format!("{}: {}", b.database_name, b.notes))
                    .collect();
                if failed.is_empty() {
                    (
                        JobStatus::Success,
                        format!("Backup completed successfully ({} database(s))", backups.len()),
                    )
                } else {
                    (
                        JobStatus::Failed,
                        format!(
                            "{} of {} database backup(s) failed: {}",
                            failed.len(),
                            backups.len(),
                            failed.join("; ")
                        ),
                    )
                }
            }
            Err(e) => (JobStatus::Failed, format!("Backup failed: {}", e)),
        };

        match status {
            JobStatus::Success => info!(job_id = job.id, "✅ Job completed: {}", notes),
            _ => error!(job_id = job.id, "❌ Job failed: {}", notes),
        }

        let next = next_run_after(&job.schedule, Utc::now());
        if let Err(e) = self
            .repo
            .update_job_run_status(job.id, status, &notes, Some(started_at), next)
            .await
        {
            error!(job_id = job.id, "Failed to update job status: {}", e);
        }
        status
    }

    /// Marks jobs and backups left `running` by a previous process as
    /// failed. Returns how many records were touched.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for job in self.repo.list_jobs().await? {
            if job.last_run_status == JobStatus::Running {
                self.repo
                    .update_job_run_status(job.id, JobStatus::Failed, INTERRUPTED_NOTE, None, None)
                    .await?;
                recovered += 1;
            }
        }
        for mut backup in self.repo.list_running_backups().await? {
            backup.mark_failed(INTERRUPTED_NOTE);
            self.repo.update_backup(&backup).await?;
            recovered += 1;
        }
        Ok(recovered)
    }
}

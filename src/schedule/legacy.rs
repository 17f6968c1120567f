// dumptool/src/schedule/legacy.rs
//! One-time conversion of the old per-target `schedule_time` ("HH:MM")
//! into daily schedule jobs.
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

use super::recurrence::{Recurrence, ScheduleConfig};
use crate::errors::{AppError, Result};
use crate::store::Repository;
use crate::store::models::{BackupOptions, ScheduleJob};

static SCHEDULE_TIME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{1,2})$").ok());

/// Parses `HH:MM` into (hour, minute).
pub fn parse_schedule_time(s: &str) -> Result<(u32, u32)> {
    let re = SCHEDULE_TIME
        .as_ref()
        .ok_or_else(|| AppError::Config("schedule time pattern failed to compile".to_string()))?;
    let invalid = || AppError::InvalidInput(format!("invalid schedule time '{}', expected HH:MM", s));

    let caps = re.captures(s.trim()).ok_or_else(invalid)?;
    let hour: u32 = caps[1].parse().map_err(|_| invalid())?;
    let minute: u32 = caps[2].parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(AppError::InvalidInput(format!("schedule time '{}' is out of range", s)));
    }
    Ok((hour, minute))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub invalid: usize,
}

/// Creates an active daily job for every target that still carries a legacy
/// schedule time, then clears the field. Invalid values are left in place.
pub async fn migrate_legacy_schedules(repo: &dyn Repository) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    for mut target in repo.list_targets().await? {
        let legacy = target.schedule_time.trim().to_string();
        if legacy.is_empty() {
            continue;
        }
        let (hour, minute) = match parse_schedule_time(&legacy) {
            Ok(hm) => hm,
            Err(e) => {
                warn!(target = %target.name, "⚠️ Skipping legacy schedule: {}", e);
                report.invalid += 1;
                continue;
            }
        };

        let schedule = ScheduleConfig::new(Recurrence::Daily {
            minutes: vec![minute],
            hours: vec![hour],
        });
        let mut job = ScheduleJob::new(
            target.id,
            &format!("{} daily {}", target.name, legacy),
            schedule,
            BackupOptions::for_target(&target),
        );
        job.description = format!("Migrated from legacy schedule time {}", legacy);
        repo.create_job(&mut job).await?;

        target.schedule_time.clear();
        target.updated_at = chrono::Utc::now();
        repo.update_target(&target).await?;

        info!(target = %target.name, job_id = job.id, "Migrated legacy schedule {}", legacy);
        report.migrated += 1;
    }
    Ok(report)
}

// dumptool/src/schedule/recurrence.rs
//! When a schedule job fires next.
//!
//! `next_after` is a pure function of a naive wall-clock time; the scheduler
//! feeds it local time and resolves the answer back to UTC with
//! `next_run_after`.
use chrono::{DateTime, Datelike, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const SCHEDULE_VERSION: u32 = 1;

fn default_version() -> u32 {
    SCHEDULE_VERSION
}

/// Persisted schedule of a job.
///
/// Serializes flat, e.g. `{"version":1,"frequency":"daily","minutes":[30],"hours":[2]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(flatten)]
    pub recurrence: Recurrence,
}

impl ScheduleConfig {
    pub fn new(recurrence: Recurrence) -> Self {
        ScheduleConfig { version: SCHEDULE_VERSION, recurrence }
    }
}

/// Weekdays are numbered Monday=1 through Sunday=7.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "lowercase")]
pub enum Recurrence {
    Hourly {
        #[serde(default)]
        minutes: Vec<u32>,
    },
    Daily {
        #[serde(default)]
        minutes: Vec<u32>,
        #[serde(default)]
        hours: Vec<u32>,
    },
    Weekly {
        #[serde(default)]
        minutes: Vec<u32>,
        #[serde(default)]
        hours: Vec<u32>,
        #[serde(default)]
        weekdays: Vec<u32>,
    },
    Monthly {
        #[serde(default)]
        minutes: Vec<u32>,
        #[serde(default)]
        hours: Vec<u32>,
        #[serde(default)]
        days_of_month: Vec<u32>,
    },
    Yearly {
        #[serde(default)]
        minutes: Vec<u32>,
        #[serde(default)]
        hours: Vec<u32>,
        #[serde(default)]
        days_of_month: Vec<u32>,
        #[serde(default)]
        months: Vec<u32>,
    },
}

/// Sorted, deduplicated, in-range values; `default` when nothing is left.
fn normalize(values: &[u32], min: u32, max: u32, default: u32) -> Vec<u32> {
    let mut out: Vec<u32> = values.iter().copied().filter(|v| (min..=max).contains(v)).collect();
    out.sort_unstable();
    out.dedup();
    if out.is_empty() {
        out.push(default);
    }
    out
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|d| d.day())
}

/// `day` in the given month, or the month's last day when `day` does not
/// exist in it.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let last = last_day_of_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day.min(last))
}

/// Adds `offset` months to (year, month), month being 1-based.
fn shift_month(year: i32, month: u32, offset: u32) -> (i32, u32) {
    let index = (month - 1) + offset;
    (year + (index / 12) as i32, index % 12 + 1)
}

/// Earliest time-of-day on `date` strictly after `now`.
fn first_on_day(date: NaiveDate, hours: &[u32], minutes: &[u32], now: NaiveDateTime) -> Option<NaiveDateTime> {
    for &hour in hours {
        for &minute in minutes {
            if let Some(candidate) = date.and_hms_opt(hour, minute, 0) {
                if candidate > now {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

/// Earliest trigger strictly after `now`.
///
/// Returns `None` only when the answer would fall outside the calendar
/// range chrono can represent.
pub fn next_after(recurrence: &Recurrence, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let today = now.date();
    match recurrence {
        Recurrence::Hourly { minutes } => {
            let minutes = normalize(minutes, 0, 59, 0);
            let this_hour = today.and_hms_opt(now.hour(), 0, 0)?;
            [this_hour, this_hour + Duration::hours(1)]
                .into_iter()
                .flat_map(|hour| minutes.iter().map(move |&m| hour + Duration::minutes(i64::from(m))))
                .find(|candidate| *candidate > now)
        }
        Recurrence::Daily { minutes, hours } => {
            let minutes = normalize(minutes, 0, 59, 0);
            let hours = normalize(hours, 0, 23, 0);
            (0..=1)
                .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
                .find_map(|date| first_on_day(date, &hours, &minutes, now))
        }
        Recurrence::Weekly { minutes, hours, weekdays } => {
            let minutes = normalize(minutes, 0, 59, 0);
            let hours = normalize(hours, 0, 23, 0);
            let weekdays = normalize(weekdays, 1, 7, 1);
            // Offset 7 is the same weekday next week.
            (0..=7)
                .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
                .filter(|date| weekdays.contains(&date.weekday().number_from_monday()))
                .find_map(|date| first_on_day(date, &hours, &minutes, now))
        }
        Recurrence::Monthly { minutes, hours, days_of_month } => {
            let minutes = normalize(minutes, 0, 59, 0);
            let hours = normalize(hours, 0, 23, 0);
            let days = normalize(days_of_month, 1, 31, 1);
            (0..=1)
                .map(|offset| shift_month(today.year(), today.month(), offset))
                .flat_map(|(year, month)| days.iter().filter_map(move |&d| clamped_date(year, month, d)))
                .find_map(|date| first_on_day(date, &hours, &minutes, now))
        }
        Recurrence::Yearly { minutes, hours, days_of_month, months } => {
            let minutes = normalize(minutes, 0, 59, 0);
            let hours = normalize(hours, 0, 23, 0);
            let days = normalize(days_of_month, 1, 31, 1);
            let months = normalize(months, 1, 12, 1);
            (0..=1)
                .map(|offset| today.year() + offset)
                .flat_map(|year| months.iter().map(move |&m| (year, m)))
                .flat_map(|(year, month)| days.iter().filter_map(move |&d| clamped_date(year, month, d)))
                .find_map(|date| first_on_day(date, &hours, &minutes, now))
        }
    }
}

/// Next trigger after `now`, evaluated in the server's local time zone.
///
/// Wall-clock times skipped by a DST change move forward an hour; repeated
/// ones resolve to their first occurrence.
pub fn next_run_after(schedule: &ScheduleConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    next_run_in(&Local, schedule, now)
}

pub fn next_run_in<Tz: TimeZone>(tz: &Tz, schedule: &ScheduleConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut base = now.with_timezone(tz).naive_local();
    // A few rounds cover a candidate that lands before `now` after a fold.
    for _ in 0..4 {
        let naive = next_after(&schedule.recurrence, base)?;
        let resolved = match tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => Some(t),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest(),
        };
        if let Some(t) = resolved.map(|t| t.with_timezone(&Utc)) {
            if t > now {
                return Some(t);
            }
        }
        base = naive;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> anyhow::Result<NaiveDateTime> {
        Ok(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")?)
    }

    fn next(recurrence: &Recurrence, now: &str) -> anyhow::Result<String> {
        let next = next_after(recurrence, at(now)?).ok_or_else(|| anyhow::anyhow!("no next run"))?;
        Ok(next.format("%Y-%m-%d %H:%M").to_string())
    }

    #[test]
    fn test_daily_today_or_tomorrow() -> anyhow::Result<()> {
        let daily = Recurrence::Daily { minutes: vec![30], hours: vec![2] };
        assert_eq!(next(&daily, "2024-05-10 01:00")?, "2024-05-10 02:30");
        assert_eq!(next(&daily, "2024-05-10 03:00")?, "2024-05-11 02:30");
        // Exactly at the trigger is not "after".
        assert_eq!(next(&daily, "2024-05-10 02:30")?, "2024-05-11 02:30");
        // Year boundary.
        assert_eq!(next(&daily, "2024-12-31 23:00")?, "2025-01-01 02:30");
        Ok(())
    }

    #[test]
    fn test_daily_multiple_times_pick_earliest_pair() -> anyhow::Result<()> {
        let daily = Recurrence::Daily { minutes: vec![45, 15], hours: vec![18, 6] };
        assert_eq!(next(&daily, "2024-05-10 06:20")?, "2024-05-10 06:45");
        assert_eq!(next(&daily, "2024-05-10 07:00")?, "2024-05-10 18:15");
        assert_eq!(next(&daily, "2024-05-10 18:50")?, "2024-05-11 06:15");
        Ok(())
    }

    #[test]
    fn test_hourly() -> anyhow::Result<()> {
        let hourly = Recurrence::Hourly { minutes: vec![45, 15] };
        assert_eq!(next(&hourly, "2024-05-10 10:00")?, "2024-05-10 10:15");
        assert_eq!(next(&hourly, "2024-05-10 10:15")?, "2024-05-10 10:45");
        assert_eq!(next(&hourly, "2024-05-10 10:50")?, "2024-05-10 11:15");
        assert_eq!(next(&hourly, "2024-05-10 23:50")?, "2024-05-11 00:15");

        let every_hour = Recurrence::Hourly { minutes: vec![] };
        assert_eq!(next(&every_hour, "2024-05-10 10:00")?, "2024-05-10 11:00");
        Ok(())
    }

    #[test]
    fn test_weekly() -> anyhow::Result<()> {
        // 2024-05-08 is a Wednesday.
        let weekly = Recurrence::Weekly { minutes: vec![0], hours: vec![9], weekdays: vec![1, 5] };
        assert_eq!(next(&weekly, "2024-05-08 12:00")?, "2024-05-10 09:00");
        assert_eq!(next(&weekly, "2024-05-10 10:00")?, "2024-05-13 09:00");

        // Same weekday, time already passed: one week later.
        let wednesdays = Recurrence::Weekly { minutes: vec![0], hours: vec![9], weekdays: vec![3] };
        assert_eq!(next(&wednesdays, "2024-05-08 08:00")?, "2024-05-08 09:00");
        assert_eq!(next(&wednesdays, "2024-05-08 09:30")?, "2024-05-15 09:00");

        let sundays = Recurrence::Weekly { minutes: vec![], hours: vec![], weekdays: vec![7] };
        assert_eq!(next(&sundays, "2024-05-08 09:30")?, "2024-05-12 00:00");

        let default_monday = Recurrence::Weekly { minutes: vec![], hours: vec![], weekdays: vec![] };
        assert_eq!(next(&default_monday, "2024-05-08 09:30")?, "2024-05-13 00:00");
        Ok(())
    }

    #[test]
    fn test_monthly_falls_back_to_last_day() -> anyhow::Result<()> {
        let day31 = Recurrence::Monthly { minutes: vec![0], hours: vec![3], days_of_month: vec![31] };
        assert_eq!(next(&day31, "2023-02-10 12:00")?, "2023-02-28 03:00");
        assert_eq!(next(&day31, "2024-02-10 12:00")?, "2024-02-29 03:00");
        assert_eq!(next(&day31, "2024-02-29 04:00")?, "2024-03-31 03:00");
        assert_eq!(next(&day31, "2024-04-30 04:00")?, "2024-05-31 03:00");
        assert_eq!(next(&day31, "2024-12-31 04:00")?, "2025-01-31 03:00");

        let mid = Recurrence::Monthly { minutes: vec![0], hours: vec![3], days_of_month: vec![15, 1] };
        assert_eq!(next(&mid, "2024-05-10 12:00")?, "2024-05-15 03:00");
        assert_eq!(next(&mid, "2024-05-15 12:00")?, "2024-06-01 03:00");
        Ok(())
    }

    #[test]
    fn test_yearly() -> anyhow::Result<()> {
        let leap = Recurrence::Yearly { minutes: vec![0], hours: vec![0], days_of_month: vec![29], months: vec![2] };
        assert_eq!(next(&leap, "2023-03-01 00:00")?, "2024-02-29 00:00");
        assert_eq!(next(&leap, "2024-03-01 00:00")?, "2025-02-28 00:00");

        let twice = Recurrence::Yearly { minutes: vec![30], hours: vec![1], days_of_month: vec![1], months: vec![7, 1] };
        assert_eq!(next(&twice, "2024-03-15 00:00")?, "2024-07-01 01:30");
        assert_eq!(next(&twice, "2024-07-01 02:00")?, "2025-01-01 01:30");

        let default_new_year = Recurrence::Yearly { minutes: vec![], hours: vec![], days_of_month: vec![], months: vec![] };
        assert_eq!(next(&default_new_year, "2024-01-01 00:00")?, "2025-01-01 00:00");
        Ok(())
    }

    #[test]
    fn test_out_of_range_entries_are_ignored() -> anyhow::Result<()> {
        let daily = Recurrence::Daily { minutes: vec![75, 30], hours: vec![25, 2] };
        assert_eq!(next(&daily, "2024-05-10 01:00")?, "2024-05-10 02:30");

        let all_bad = Recurrence::Daily { minutes: vec![99], hours: vec![99] };
        assert_eq!(next(&all_bad, "2024-05-10 01:00")?, "2024-05-11 00:00");
        Ok(())
    }

    #[test]
    fn test_schedule_config_json_shape() -> anyhow::Result<()> {
        let config: ScheduleConfig = serde_json::from_str(
            r#"{"frequency":"daily","minutes":[30],"hours":[2],"weekdays":[],"days_of_month":[],"months":[]}"#,
        )?;
        assert_eq!(config.version, SCHEDULE_VERSION);
        assert_eq!(config.recurrence, Recurrence::Daily { minutes: vec![30], hours: vec![2] });

        let json = serde_json::to_value(ScheduleConfig::new(Recurrence::Hourly { minutes: vec![5] }))?;
        assert_eq!(json["frequency"], "hourly");
        assert_eq!(json["version"], 1);
        assert_eq!(json["minutes"], serde_json::json!([5]));

        assert!(serde_json::from_str::<ScheduleConfig>(r#"{"frequency":"fortnightly"}"#).is_err());
        Ok(())
    }

    #[test]
    fn test_next_run_is_strictly_after_now_in_utc() -> anyhow::Result<()> {
        let schedule = ScheduleConfig::new(Recurrence::Daily { minutes: vec![30], hours: vec![2] });
        let now = Utc
            .with_ymd_and_hms(2024, 5, 10, 1, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid test time"))?;
        let next = next_run_in(&Utc, &schedule, now).ok_or_else(|| anyhow::anyhow!("no next run"))?;
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 10, 2, 30, 0).single().ok_or_else(|| anyhow::anyhow!("bad"))?);

        let local = next_run_after(&schedule, now).ok_or_else(|| anyhow::anyhow!("no local next run"))?;
        assert!(local > now);
        Ok(())
    }
}

use super::job::BackupReport;
use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Something the scheduler can run, on a timer or on demand.
#[async_trait]
pub trait BackupRunner: Send + Sync + 'static {
    async fn run_backup(&self) -> Result<BackupReport>;
}

/// Parses a cron expression. Five fields are Unix cron (minute resolution,
/// Sunday is day 0 or 7); six or seven fields use the `cron` crate's own
/// dialect with a leading seconds column and Sunday as day 1.
pub fn parse_expression(expression: &str) -> std::result::Result<Schedule, SchedulerError> {
    let invalid = |reason: String| SchedulerError::InvalidExpression {
        expression: expression.to_string(),
        reason,
    };

    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [minute, hour, day_of_month, month, day_of_week] => format!(
            "0 {} {} {} {} {}",
            minute,
            hour,
            day_of_month,
            month,
            unix_day_of_week(day_of_week).map_err(invalid)?
        ),
        _ => fields.join(" "),
    };
    Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}

/// Rewrites a Unix day-of-week field (0-7, Sunday = 0 and 7) into the
/// 1-7 numbering of the `cron` crate. Names, `*` and `?` carry over as is.
fn unix_day_of_week(field: &str) -> std::result::Result<String, String> {
    let parts = field
        .split(',')
        .map(unix_day_token)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

fn unix_day_token(token: &str) -> std::result::Result<String, String> {
    let (range, step) = match token.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (token, None),
    };
    // `*/n` lines up already: both numberings start the week on Sunday.
    if range == "*" || range == "?" || !range.chars().all(|c| c.is_ascii_digit() || c == '-') {
        return Ok(token.to_string());
    }

    let day = |value: &str| {
        value
            .parse::<usize>()
            .ok()
            .filter(|d| *d <= 7)
            .ok_or_else(|| format!("invalid day of week '{}' (expected 0-7)", value))
    };
    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (day(start)?, day(end)?),
        None if step.is_some() => (day(range)?, 6),
        None => {
            let d = day(range)?;
            (d, d)
        }
    };
    if start > end {
        return Err(format!("invalid day-of-week range '{}'", range));
    }
    let step = match step {
        Some(step) => step
            .parse::<usize>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| format!("invalid day-of-week step '{}'", step))?,
        None => 1,
    };

    let mut days: Vec<usize> = (start..=end).step_by(step).map(|d| d % 7 + 1).collect();
    days.sort_unstable();
    days.dedup();
    Ok(days.iter().map(usize::to_string).collect::<Vec<_>>().join(","))
}

struct ActiveTrigger {
    id: u64,
    task: JoinHandle<()>,
}

enum SchedulerState {
    Stopped,
    Running(ActiveTrigger),
}

struct Inner {
    state: SchedulerState,
    triggers_armed: u64,
}

pub struct Scheduler {
    expression: String,
    runner: Arc<dyn BackupRunner>,
    inner: Mutex<Inner>,
}

impl Scheduler {
    pub fn new(expression: impl Into<String>, runner: Arc<dyn BackupRunner>) -> Self {
        Self {
            expression: expression.into(),
            runner,
            inner: Mutex::new(Inner {
                state: SchedulerState::Stopped,
                triggers_armed: 0,
            }),
        }
    }

    /// Arms the recurring trigger. Does nothing if it is already armed.
    pub async fn start(&self) -> std::result::Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        if let SchedulerState::Running(_) = inner.state {
            return Ok(());
        }

        let schedule = parse_expression(&self.expression)?;
        inner.triggers_armed += 1;
        let id = inner.triggers_armed;
        let task = tokio::spawn(fire_loop(schedule, self.runner.clone()));
        inner.state = SchedulerState::Running(ActiveTrigger { id, task });

        info!("Scheduler started with cron expression: {}", self.expression);
        Ok(())
    }

    /// Disarms the trigger. Backups already in flight run to completion.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let SchedulerState::Running(trigger) =
            std::mem::replace(&mut inner.state, SchedulerState::Stopped)
        {
            trigger.task.abort();
            info!("Scheduler stopped");
        }
    }

    /// Runs one backup now, whether or not the trigger is armed.
    pub async fn run_now(&self) -> Result<BackupReport> {
        info!("Manual backup triggered at {}", Utc::now().to_rfc3339());
        let report = self.runner.run_backup().await?;
        info!("Manual backup completed successfully at {}", Utc::now().to_rfc3339());
        Ok(report)
    }

    pub async fn is_running(&self) -> bool {
        matches!(self.inner.lock().await.state, SchedulerState::Running(_))
    }

    /// Identifier of the armed trigger; a new one is issued on every arming.
    pub async fn active_trigger(&self) -> Option<u64> {
        match &self.inner.lock().await.state {
            SchedulerState::Running(trigger) => Some(trigger.id),
            SchedulerState::Stopped => None,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let SchedulerState::Running(trigger) = &self.inner.get_mut().state {
            trigger.task.abort();
        }
    }
}

/// The firing after `last` that is also after `now`, and how many slots
/// between the two were missed. Missed slots are never fired, so a stalled
/// or suspended host catches up with one run instead of a burst.
fn next_firing(
    schedule: &Schedule,
    last: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, usize) {
    let missed = if now > last {
        schedule.after(&last).take_while(|slot| *slot <= now).count()
    } else {
        0
    };
    (schedule.after(&last.max(now)).next(), missed)
}

/// Sleeps until each firing and hands the backup to its own task, so a slow
/// or failing run never delays or disarms the next firing.
async fn fire_loop(schedule: Schedule, runner: Arc<dyn BackupRunner>) {
    let mut cursor = Utc::now();
    loop {
        let (next, missed) = next_firing(&schedule, cursor, Utc::now());
        if missed > 0 {
            warn!(
                "Scheduler fell behind, skipping {} missed firing(s) since {}",
                missed,
                cursor.to_rfc3339()
            );
        }
        let Some(next) = next else {
            warn!("Cron expression has no upcoming firings, scheduler idle");
            return;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(delay).await;
        cursor = next;

        info!("Scheduled backup triggered at {}", Utc::now().to_rfc3339());
        let runner = runner.clone();
        tokio::spawn(async move {
            match runner.run_backup().await {
                Ok(report) => info!(
                    "Scheduled backup completed successfully at {}: {}",
                    Utc::now().to_rfc3339(),
                    report.key
                ),
                Err(e) => error!("Scheduled backup failed: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::retention::CleanupSummary;
    use crate::error::BackupError;
    use chrono::{Datelike, TimeDelta, TimeZone, Weekday};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const NEVER: &str = "0 0 0 1 1 * 2099";

    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BackupRunner for CountingRunner {
        async fn run_backup(&self) -> Result<BackupReport> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(BackupError::DumpFailed {
                    reason: "exit status 1".to_string(),
                    diagnostics: "connection refused".to_string(),
                });
            }
            Ok(BackupReport {
                key: format!("backup/testdb-mysql-{}.sql", n),
                bytes: 0,
                sha256: String::new(),
                duration: Duration::ZERO,
                cleanup: Ok(CleanupSummary::default()),
            })
        }
    }

    #[test]
    fn test_parse_expression() {
        assert!(parse_expression("0 0 * * *").is_ok());
        assert!(parse_expression("*/10 * * * * *").is_ok());
        assert!(parse_expression(NEVER).is_ok());
        assert!(matches!(
            parse_expression("every day at noon"),
            Err(SchedulerError::InvalidExpression { .. })
        ));
        assert!(parse_expression("").is_err());
    }

    fn upcoming_weekdays(expression: &str, from: DateTime<Utc>, count: usize) -> Vec<Weekday> {
        parse_expression(expression)
            .unwrap()
            .after(&from)
            .take(count)
            .map(|t| t.weekday())
            .collect()
    }

    #[test]
    fn test_five_field_day_of_week_uses_unix_numbering() {
        // Saturday.
        let from = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();

        let weekdays = upcoming_weekdays("0 9 * * 1-5", from, 10);
        assert_eq!(
            &weekdays[..5],
            &[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
        );
        assert!(weekdays.iter().all(|d| *d != Weekday::Sat && *d != Weekday::Sun));

        assert_eq!(upcoming_weekdays("0 0 * * 0", from, 3), vec![Weekday::Sun; 3]);
        assert_eq!(upcoming_weekdays("0 0 * * 7", from, 2), vec![Weekday::Sun; 2]);
        assert_eq!(
            upcoming_weekdays("0 0 * * 5-7", from, 3),
            vec![Weekday::Sun, Weekday::Fri, Weekday::Sat]
        );
        assert_eq!(
            upcoming_weekdays("0 0 * * 0,3", from, 2),
            vec![Weekday::Sun, Weekday::Wed]
        );
        assert_eq!(
            upcoming_weekdays("0 0 * * MON-FRI", from, 1),
            vec![Weekday::Mon]
        );
    }

    #[test]
    fn test_six_field_day_of_week_is_passed_through() {
        let from = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        // The crate's own dialect: 1 is Sunday.
        assert_eq!(upcoming_weekdays("0 0 0 * * 1", from, 1), vec![Weekday::Sun]);
    }

    #[test]
    fn test_invalid_day_of_week_is_rejected() {
        for expression in ["0 0 * * 8", "0 0 * * 5-2", "0 0 * * 1/0"] {
            assert!(
                matches!(parse_expression(expression), Err(SchedulerError::InvalidExpression { .. })),
                "{} should be rejected",
                expression
            );
        }
    }

    #[test]
    fn test_stalled_loop_skips_missed_slots() {
        let hourly = parse_expression("0 * * * *").unwrap();
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = last + TimeDelta::hours(24) + TimeDelta::minutes(30);

        let (next, missed) = next_firing(&hourly, last, now);

        assert_eq!(missed, 24);
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2024, 1, 2, 1, 0, 0).unwrap()));
        // Nothing left to fire without waiting.
        assert!(next.unwrap() > now);
    }

    #[test]
    fn test_next_firing_in_step_and_after_clock_step_back() {
        let hourly = parse_expression("0 * * * *").unwrap();
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap();

        let (next, missed) = next_firing(&hourly, last, last + TimeDelta::milliseconds(3));
        assert_eq!((next, missed), (Some(last + TimeDelta::hours(1)), 0));

        // The wall clock moved backwards: the slot just fired is not repeated.
        let (next, missed) = next_firing(&hourly, last, last - TimeDelta::minutes(5));
        assert_eq!((next, missed), (Some(last + TimeDelta::hours(1)), 0));
    }

    #[test]
    fn test_five_field_expression_fires_on_the_minute() {
        let schedule = parse_expression("30 2 * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "02:30:00");
    }

    #[tokio::test]
    async fn test_start_twice_arms_one_trigger() {
        let scheduler = Scheduler::new(NEVER, Arc::new(CountingRunner::default()));

        scheduler.start().await.unwrap();
        let first = scheduler.active_trigger().await;
        scheduler.start().await.unwrap();

        assert_eq!(first, Some(1));
        assert_eq!(scheduler.active_trigger().await, first);
        assert!(scheduler.is_running().await);

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        assert_eq!(scheduler.active_trigger().await, None);

        scheduler.start().await.unwrap();
        assert_eq!(scheduler.active_trigger().await, Some(2));
    }

    #[tokio::test]
    async fn test_concurrent_starts_arm_one_trigger() {
        let scheduler = Arc::new(Scheduler::new(NEVER, Arc::new(CountingRunner::default())));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.start().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(scheduler.active_trigger().await, Some(1));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_a_no_op() {
        let scheduler = Scheduler::new(NEVER, Arc::new(CountingRunner::default()));
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_invalid_expression_fails_start() {
        let scheduler = Scheduler::new("61 * * * *", Arc::new(CountingRunner::default()));
        let err = scheduler.start().await.unwrap_err();
        assert!(err.to_string().contains("61 * * * *"));
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_run_now_while_stopped_returns_result() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = Scheduler::new(NEVER, runner.clone());

        let report = scheduler.run_now().await.unwrap();

        assert_eq!(report.key, "backup/testdb-mysql-1.sql");
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_run_now_repeatedly_runs_each_time() {
        let runner = Arc::new(CountingRunner::default());
        let scheduler = Scheduler::new(NEVER, runner.clone());

        let mut keys = Vec::new();
        for _ in 0..4 {
            keys.push(scheduler.run_now().await.unwrap().key);
        }

        assert_eq!(runner.calls.load(Ordering::SeqCst), 4);
        keys.dedup();
        assert_eq!(keys.len(), 4);
    }

    #[tokio::test]
    async fn test_run_now_propagates_failure() {
        let runner = Arc::new(CountingRunner {
            fail: true,
            ..Default::default()
        });
        let scheduler = Scheduler::new(NEVER, runner);

        let err = scheduler.run_now().await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_failing_scheduled_runs_keep_firing() {
        let runner = Arc::new(CountingRunner {
            fail: true,
            ..Default::default()
        });
        let scheduler = Scheduler::new("* * * * * *", runner.clone());

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3200)).await;
        scheduler.stop().await;
        // Let a run spawned right at the stop boundary get polled.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let fired = runner.calls.load(Ordering::SeqCst);
        assert!(fired >= 2, "expected at least two firings, got {}", fired);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), fired);
    }
}

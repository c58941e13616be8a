use std::sync::Arc;

use chrono::{DateTime, Local};
use croner::Cron;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};

use super::SyncEngine;

/// A parsed 5-field crontab expression (minute hour day month weekday).
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    cron: Cron,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> SyncResult<Self> {
        let expr = expr.trim();
        let fields = expr.split_whitespace().count();
        if fields != 5 {
            return Err(SyncError::Config(format!(
                "schedule {expr:?} must have 5 fields, found {fields}"
            )));
        }

        let cron = Cron::new(expr)
            .parse()
            .map_err(|e| SyncError::Config(format!("invalid schedule {expr:?}: {e}")))?;

        Ok(Self {
            expr: expr.to_string(),
            cron,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.cron.find_next_occurrence(after, false).ok()
    }
}

/// Background task firing `SyncEngine::run_once` on a cron schedule.
pub struct Scheduler {
    schedule: CronSchedule,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the schedule loop. It runs until `cancel` fires or `stop` is
    /// called.
    pub fn start(engine: Arc<SyncEngine>, schedule: CronSchedule, cancel: CancellationToken) -> Self {
        let task_schedule = schedule.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            schedule_loop(engine, task_schedule, task_cancel).await;
        });

        tracing::info!(schedule = %schedule.expr(), "scheduler started");
        Self {
            schedule,
            cancel,
            handle,
        }
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn next_run(&self) -> Option<DateTime<Local>> {
        self.schedule.next_after(&Local::now())
    }

    /// Cancel the loop and wait for it. A run already in progress finishes
    /// first.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "scheduler task panicked");
        }
        tracing::info!("scheduler stopped");
    }
}

async fn schedule_loop(engine: Arc<SyncEngine>, schedule: CronSchedule, cancel: CancellationToken) {
    loop {
        let now = Local::now();
        let Some(next) = schedule.next_after(&now) else {
            tracing::warn!(schedule = %schedule.expr(), "schedule has no future fire time");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!(next = %next.to_rfc3339(), "next scheduled run");

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        match engine.run_once(false).await {
            Ok(Some(_)) => {}
            Ok(None) => tracing::info!("scheduled run skipped"),
            Err(e) => tracing::error!(error = %e, "scheduled run failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert!(matches!(
            CronSchedule::parse("0 2 * *"),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            CronSchedule::parse("0 0 2 * * *"),
            Err(SyncError::Config(_))
        ));
        assert!(CronSchedule::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_values() {
        assert!(CronSchedule::parse("61 2 * * *").is_err());
        assert!(CronSchedule::parse("0 25 * * *").is_err());
        assert!(CronSchedule::parse("x 2 * * *").is_err());
    }

    #[test]
    fn test_next_daily_run() {
        let schedule = CronSchedule::parse(" 0 2 * * * ").unwrap();
        assert_eq!(schedule.expr(), "0 2 * * *");

        let before = Local.with_ymd_and_hms(2026, 3, 10, 1, 30, 0).unwrap();
        let next = schedule.next_after(&before).unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (10, 2, 0));

        let after = Local.with_ymd_and_hms(2026, 3, 10, 2, 0, 0).unwrap();
        let next = schedule.next_after(&after).unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (11, 2, 0));
    }

    #[test]
    fn test_sunday_is_zero() {
        let schedule = CronSchedule::parse("30 4 * * 0").unwrap();
        // 2026-03-10 is a Tuesday.
        let from = Local.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let next = schedule.next_after(&from).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!((next.hour(), next.minute()), (4, 30));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let tmp = tempfile::tempdir().unwrap();
        let config = parse_config(&format!(
            "[general]\nstate_dir = {:?}\n",
            tmp.path().display().to_string()
        ))
        .unwrap();
        let engine = Arc::new(SyncEngine::new(config).unwrap());
        let schedule = CronSchedule::parse("0 0 1 1 *").unwrap();

        let scheduler = Scheduler::start(engine, schedule, CancellationToken::new());
        assert!(scheduler.next_run().unwrap() > Local::now());
        assert_eq!(scheduler.schedule().expr(), "0 0 1 1 *");

        tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
            .await
            .unwrap();
    }
}

//! Cron scheduling kernel. Pure function of `(schedule, reference times, now)`
//! so it can be property-tested with fixed clocks and no cluster: this module never
//! reads the wall clock or mutates status, it only computes what the caller should do
//! with it.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("cron expression '{0}' is invalid")]
pub struct CronError(pub String);

/// Default steady-state poll interval for unscheduled (continuous) experiments and for
/// handler success.
pub const CONTINUOUS_REQUEUE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDecision {
    pub should_run: bool,
    pub requeue_after: Duration,
    /// Set only when `should_run`; caller stamps `status.lastScheduledTime` with `now`
    /// and `status.nextScheduledTime` with this value.
    pub next_scheduled_time: Option<DateTime<Utc>>,
}

/// The `cron` crate's grammar is `sec min hour dom month dow [year]`; the 5-field cron
/// expressions used here have no seconds column, so we prepend a literal `0` to reuse
/// the crate's parser unmodified.
fn parse(expr: &str) -> Result<CronSchedule, CronError> {
    let six_field = format!("0 {}", expr.trim());
    CronSchedule::from_str(&six_field).map_err(|_| CronError(expr.to_string()))
}

/// Syntax-only cron validation, exposed for admission to confirm the schedule is a
/// valid 5-field cron expression without computing a fire decision.
pub fn validate_cron(expr: &str) -> Result<(), CronError> {
    parse(expr).map(|_| ())
}

fn next_fire(schedule: &CronSchedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Returns whether the schedule is due to fire now and how long to wait before the next
/// check. `reference_time` is `lastScheduledTime` else `startTime` else the resource's
/// creation timestamp (caller resolves that precedence before calling in).
pub fn check_schedule(
    expr: Option<&str>,
    reference_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ScheduleDecision, CronError> {
    let Some(expr) = expr else {
        return Ok(ScheduleDecision {
            should_run: true,
            requeue_after: CONTINUOUS_REQUEUE,
            next_scheduled_time: None,
        });
    };

    let schedule = parse(expr)?;
    let just_before_ref = reference_time - chrono::Duration::seconds(1);
    let last_fire = next_fire(&schedule, just_before_ref);

    let should_run = matches!(last_fire, Some(t) if t <= now && t > reference_time);
    if should_run {
        return Ok(ScheduleDecision {
            should_run: true,
            requeue_after: CONTINUOUS_REQUEUE,
            next_scheduled_time: next_fire(&schedule, now),
        });
    }

    let next = next_fire(&schedule, now);
    let requeue_after = next
        .map(|t| (t - now).to_std().unwrap_or(CONTINUOUS_REQUEUE))
        .unwrap_or(CONTINUOUS_REQUEUE);
    Ok(ScheduleDecision {
        should_run: false,
        requeue_after,
        next_scheduled_time: next,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn no_schedule_always_runs_continuously() {
        let d = check_schedule(None, t("2026-01-01T00:00:00Z"), t("2026-01-01T00:00:00Z")).unwrap();
        assert!(d.should_run);
        assert_eq!(d.requeue_after, CONTINUOUS_REQUEUE);
    }

    #[test]
    fn invalid_cron_surfaces_error() {
        assert!(check_schedule(Some("not a cron"), Utc::now(), Utc::now()).is_err());
    }

    #[test]
    fn runs_once_when_due_every_minute() {
        let reference = t("2026-01-01T00:00:00Z");
        let now = t("2026-01-01T00:01:30Z");
        let d = check_schedule(Some("* * * * *"), reference, now).unwrap();
        assert!(d.should_run);
        assert!(d.next_scheduled_time.unwrap() > now);
    }

    #[test]
    fn does_not_rerun_same_reference_fire() {
        // Reference time is itself the last fire; nothing new has elapsed.
        let reference = t("2026-01-01T00:01:00Z");
        let now = t("2026-01-01T00:01:30Z");
        let d = check_schedule(Some("* * * * *"), reference, now).unwrap();
        assert!(!d.should_run);
    }

    #[test]
    fn requeue_after_targets_next_fire_when_not_due() {
        let reference = t("2026-01-01T00:00:00Z");
        let now = t("2026-01-01T00:00:10Z");
        let d = check_schedule(Some("0 * * * *"), reference, now).unwrap();
        assert!(!d.should_run);
        assert!(d.requeue_after <= Duration::from_secs(60));
    }

    #[test]
    fn cron_next_is_strictly_increasing() {
        let schedule = parse("*/5 * * * *").unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = next_fire(&schedule, t0).unwrap();
        let t2 = next_fire(&schedule, t1).unwrap();
        assert!(t1 > t0);
        assert!(t2 > t1);
    }

    #[test]
    fn catch_up_after_outage_fires_once() {
        // Reference is hours in the past; only one fire is reported, not a backlog.
        let reference = t("2026-01-01T00:00:00Z");
        let now = t("2026-01-01T05:00:00Z");
        let d = check_schedule(Some("0 * * * *"), reference, now).unwrap();
        assert!(d.should_run);
    }
}

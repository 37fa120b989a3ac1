//! Experiment-duration lifecycle gate: pure expiry check plus the pieces of
//! status bookkeeping that don't themselves require cluster I/O. Cleanup (uncordon,
//! ephemeral-container reaping) lives in `actions::node_drain` / `actions::ephemeral`
//! since it needs a live client; this module only decides *whether* cleanup is due.

use chrono::{DateTime, Utc};

use crate::types::ChaosDuration;

pub fn is_expired(experiment_duration: Option<ChaosDuration>, start_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match (experiment_duration, start_time) {
        (Some(duration), Some(started)) => {
            let budget = chrono::Duration::from_std(duration.as_std()).unwrap_or(chrono::Duration::zero());
            now - started >= budget
        }
        // No duration configured: the experiment runs indefinitely.
        _ => false,
    }
}

pub fn completion_message(start_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match start_time {
        Some(started) => {
            let elapsed = now - started;
            format!("experiment duration elapsed after {}s", elapsed.num_seconds().max(0))
        }
        None => "experiment duration elapsed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn unset_duration_never_expires() {
        assert!(!is_expired(None, Some(Utc::now()), Utc::now()));
    }

    #[test]
    fn unset_start_time_never_expires() {
        let d = ChaosDuration::from_std(StdDuration::from_secs(60));
        assert!(!is_expired(Some(d), None, Utc::now()));
    }

    #[test]
    fn expires_once_budget_elapsed() {
        let d = ChaosDuration::from_std(StdDuration::from_secs(60));
        let start = t("2026-01-01T00:00:00Z");
        assert!(!is_expired(Some(d), Some(start), t("2026-01-01T00:00:30Z")));
        assert!(is_expired(Some(d), Some(start), t("2026-01-01T00:01:00Z")));
        assert!(is_expired(Some(d), Some(start), t("2026-01-01T00:05:00Z")));
    }
}

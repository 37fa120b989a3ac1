//! Allow-window membership kernel. Pure function over `TimeWindow` specs and
//! a wall-clock reading supplied by the caller — see the design note on pure schedule and
//! window kernels.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveTime, Timelike, Utc};

use crate::types::{TimeWindow, Weekday};

/// Bound on how far forward we search for the next membership toggle. A single past
/// absolute window with no future re-opening won't produce a boundary inside this
/// horizon; the caller then falls back to the 24h default requeue from .
const SEARCH_HORIZON: ChronoDuration = ChronoDuration::days(15);
const SEARCH_STEP: ChronoDuration = ChronoDuration::minutes(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDecision {
    pub in_window: bool,
    pub next_boundary: Option<DateTime<Utc>>,
}

/// `(inWindow, nextBoundary)` An empty `windows` list means "always in
/// window" (no gating configured).
pub fn check_time_windows(windows: &[TimeWindow], now: DateTime<Utc>) -> WindowDecision {
    if windows.is_empty() {
        return WindowDecision {
            in_window: true,
            next_boundary: None,
        };
    }

    let currently_in = in_window_at(windows, now);
    let next_boundary = find_next_toggle(windows, now, currently_in);
    WindowDecision {
        in_window: currently_in,
        next_boundary,
    }
}

fn in_window_at(windows: &[TimeWindow], at: DateTime<Utc>) -> bool {
    windows.iter().any(|w| window_covers(w, at))
}

/// Linear scan at minute granularity is deliberately simple over trying to solve window
/// arithmetic in closed form across absolute + recurring + multi-window overlaps; this
/// kernel runs at most once per reconcile, never in a hot path.
fn find_next_toggle(windows: &[TimeWindow], now: DateTime<Utc>, starting_state: bool) -> Option<DateTime<Utc>> {
    let mut t = now + SEARCH_STEP;
    let deadline = now + SEARCH_HORIZON;
    while t <= deadline {
        if in_window_at(windows, t) != starting_state {
            return Some(t);
        }
        t += SEARCH_STEP;
    }
    None
}

fn window_covers(window: &TimeWindow, at: DateTime<Utc>) -> bool {
    if window.is_recurring() {
        recurring_covers(window, at)
    } else {
        absolute_covers(window, at)
    }
}

fn absolute_covers(window: &TimeWindow, at: DateTime<Utc>) -> bool {
    let after_start = window.start.map(|s| at >= s).unwrap_or(true);
    let before_end = window.end.map(|e| at <= e).unwrap_or(true);
    after_start && before_end
}

fn recurring_covers(window: &TimeWindow, at: DateTime<Utc>) -> bool {
    let zone = window
        .timezone
        .as_deref()
        .and_then(parse_fixed_offset)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    let local = at.with_timezone(&zone);

    if !window.days_of_week.is_empty() {
        let today = Weekday::from_chrono(local.weekday());
        if !window.days_of_week.contains(&today) {
            return false;
        }
    }

    let time_of_day = local.time();
    let start = window.start_time.as_deref().and_then(parse_time_of_day);
    let end = window.end_time.as_deref().and_then(parse_time_of_day);
    match (start, end) {
        (Some(s), Some(e)) if s <= e => time_of_day >= s && time_of_day <= e,
        // Windows that straddle midnight (e.g. 22:00-06:00).
        (Some(s), Some(e)) => time_of_day >= s || time_of_day <= e,
        _ => true,
    }
}

/// Best-effort: only fixed UTC offsets (`+02:00`, `-05:30`) are supported. IANA zone
/// names (`America/New_York`) would need `chrono-tz`, which the rest of this crate's
/// dependency stack doesn't otherwise need; documented as a known limitation.
fn parse_fixed_offset(s: &str) -> Option<FixedOffset> {
    if s.eq_ignore_ascii_case("UTC") || s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = if s.starts_with('-') { -1 } else { 1 };
    let rest = s.trim_start_matches(['+', '-']);
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = h.parse().ok()?;
    let minutes: i32 = m.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S")).ok()
}

/// Rendered into the `BlockedByTimeWindow` condition message.
pub fn boundary_message(decision: &WindowDecision) -> String {
    match decision.next_boundary {
        Some(b) if !decision.in_window => format!("blocked by time window; opens at {}", b.to_rfc3339()),
        Some(b) => format!("in time window; closes at {}", b.to_rfc3339()),
        None => "blocked by time window; no further window configured".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn empty_windows_always_in_window() {
        let d = check_time_windows(&[], Utc::now());
        assert!(d.in_window);
        assert_eq!(d.next_boundary, None);
    }

    #[test]
    fn absolute_window_membership() {
        let w = TimeWindow {
            start: Some(t("2026-01-01T00:00:00Z")),
            end: Some(t("2026-01-02T00:00:00Z")),
            days_of_week: vec![],
            start_time: None,
            end_time: None,
            timezone: None,
        };
        assert!(window_covers(&w, t("2026-01-01T12:00:00Z")));
        assert!(!window_covers(&w, t("2026-01-03T00:00:00Z")));
    }

    #[test]
    fn past_absolute_window_has_no_next_boundary() {
        let w = TimeWindow {
            start: Some(t("2020-01-01T00:00:00Z")),
            end: Some(t("2020-01-02T00:00:00Z")),
            days_of_week: vec![],
            start_time: None,
            end_time: None,
            timezone: None,
        };
        let d = check_time_windows(&[w], t("2026-01-01T00:00:00Z"));
        assert!(!d.in_window);
        assert_eq!(d.next_boundary, None);
    }

    #[test]
    fn recurring_window_opens_and_closes() {
        let w = TimeWindow {
            start: None,
            end: None,
            days_of_week: vec![Weekday::from_chrono(chrono::Weekday::Thu)],
            start_time: Some("09:00".to_string()),
            end_time: Some("17:00".to_string()),
            timezone: None,
        };
        // 2026-01-01 is a Thursday.
        assert!(window_covers(&w, t("2026-01-01T12:00:00Z")));
        assert!(!window_covers(&w, t("2026-01-01T20:00:00Z")));
        assert!(!window_covers(&w, t("2026-01-02T12:00:00Z")));
    }

    #[test]
    fn membership_toggles_at_reported_boundary() {
        let w = TimeWindow {
            start: None,
            end: None,
            days_of_week: vec![],
            start_time: Some("09:00".to_string()),
            end_time: Some("17:00".to_string()),
            timezone: None,
        };
        let now = t("2026-01-01T20:00:00Z");
        let d = check_time_windows(&[w.clone()], now);
        assert!(!d.in_window);
        let boundary = d.next_boundary.expect("recurring window always has a next boundary");
        assert!(in_window_at(std::slice::from_ref(&w), boundary + ChronoDuration::seconds(1)));
    }
}

//! `TimeWindow`: an absolute or recurring allow-period for experiment execution.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    /// Absolute window: both set, `daysOfWeek` absent.
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,

    /// Recurring window: `daysOfWeek` + time-of-day bounds, optional IANA zone.
    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn from_chrono(d: chrono::Weekday) -> Self {
        use chrono::Weekday as C;
        match d {
            C::Mon => Weekday::Monday,
            C::Tue => Weekday::Tuesday,
            C::Wed => Weekday::Wednesday,
            C::Thu => Weekday::Thursday,
            C::Fri => Weekday::Friday,
            C::Sat => Weekday::Saturday,
            C::Sun => Weekday::Sunday,
        }
    }
}

impl TimeWindow {
    pub fn is_recurring(&self) -> bool {
        !self.days_of_week.is_empty() || self.start_time.is_some()
    }
}

//! `ChaosDuration`: the `([0-9]+(ms|s|m|h))+` duration grammar from the experiment spec.
//!
//! Kept as its own type (rather than bare `std::time::Duration`) so that admission can
//! reject malformed strings before they ever reach a handler, and so handlers can format
//! a duration back into the same shorthand for status messages and history records.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn duration_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(([0-9]+)(ms|s|m|h))+$").expect("static regex"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChaosDuration(Duration);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseDurationError {
    #[error("duration '{0}' does not match the required ([0-9]+(ms|s|m|h))+ grammar")]
    Malformed(String),
    #[error("duration '{0}' is empty")]
    Empty(String),
}

impl ChaosDuration {
    pub fn from_std(d: Duration) -> Self {
        Self(d)
    }

    pub fn as_std(&self) -> Duration {
        self.0
    }

    pub fn as_seconds_u64(&self) -> u64 {
        self.0.as_secs()
    }
}

impl FromStr for ChaosDuration {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseDurationError::Empty(s.to_string()));
        }
        if !duration_token_re().is_match(s) {
            return Err(ParseDurationError::Malformed(s.to_string()));
        }

        // The whole-string regex only validates the grammar; walk it again to sum components,
        // since `(ms|s|m|h)` alternation in a repeated group doesn't give us captures per token.
        let mut total = Duration::ZERO;
        let mut digits = String::new();
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let unit_start = c;
            let mut unit = String::new();
            unit.push(unit_start);
            if unit_start == 'm' && chars.peek() == Some(&'s') {
                unit.push(chars.next().unwrap());
            }
            let n: u64 = digits.parse().map_err(|_| ParseDurationError::Malformed(s.to_string()))?;
            digits.clear();
            let component = match unit.as_str() {
                "ms" => Duration::from_millis(n),
                "s" => Duration::from_secs(n),
                "m" => Duration::from_secs(n * 60),
                "h" => Duration::from_secs(n * 3600),
                _ => return Err(ParseDurationError::Malformed(s.to_string())),
            };
            total += component;
        }
        if !digits.is_empty() {
            return Err(ParseDurationError::Malformed(s.to_string()));
        }
        Ok(ChaosDuration(total))
    }
}

impl fmt::Display for ChaosDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut remaining_ms = self.0.as_millis() as u64;
        if remaining_ms == 0 {
            return write!(f, "0ms");
        }
        let hours = remaining_ms / 3_600_000;
        remaining_ms %= 3_600_000;
        let minutes = remaining_ms / 60_000;
        remaining_ms %= 60_000;
        let secs = remaining_ms / 1000;
        remaining_ms %= 1000;

        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        if secs > 0 {
            write!(f, "{secs}s")?;
        }
        if remaining_ms > 0 {
            write!(f, "{remaining_ms}ms")?;
        }
        Ok(())
    }
}

impl Serialize for ChaosDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChaosDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChaosDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl schemars::JsonSchema for ChaosDuration {
    fn schema_name() -> String {
        "ChaosDuration".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = String::json_schema(gen).into_object();
        schema.string().pattern = Some(r"^([0-9]+(ms|s|m|h))+$".to_string());
        schemars::schema::Schema::Object(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_components() {
        assert_eq!(ChaosDuration::from_str("200ms").unwrap().as_std(), Duration::from_millis(200));
        assert_eq!(ChaosDuration::from_str("30s").unwrap().as_std(), Duration::from_secs(30));
        assert_eq!(ChaosDuration::from_str("5m").unwrap().as_std(), Duration::from_secs(300));
        assert_eq!(ChaosDuration::from_str("2h").unwrap().as_std(), Duration::from_secs(7200));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            ChaosDuration::from_str("1h30m").unwrap().as_std(),
            Duration::from_secs(5400)
        );
    }

    #[test]
    fn rejects_malformed() {
        assert!(ChaosDuration::from_str("").is_err());
        assert!(ChaosDuration::from_str("10").is_err());
        assert!(ChaosDuration::from_str("10x").is_err());
        assert!(ChaosDuration::from_str("s10").is_err());
    }

    #[test]
    fn format_roundtrips_on_canonical_forms() {
        for s in ["200ms", "30s", "5m", "2h", "1h30m", "90s"] {
            let parsed = ChaosDuration::from_str(s).unwrap();
            let rendered = parsed.to_string();
            let reparsed = ChaosDuration::from_str(&rendered).unwrap();
            assert_eq!(parsed, reparsed);
        }
    }
}

use std::fmt::Display;

use log::debug;
use once_cell::sync::Lazy;
use regex_lite::{
    Captures,
    Regex,
};

use crate::data_structs::typedef::HoursType;

const UNIT_ALTERNATION: &str =
    "hours|hour|hrs|hr|h|minutes|minute|mins|min|days|day|d";

static TIME_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^(\d+(?:\.\d+)?)?[\s_]*({UNIT_ALTERNATION})(?:[\s_\-]+|$)"
    ))
    .expect("Time prefix pattern is valid")
});

static TIME_ANYWHERE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:^|[^0-9A-Za-z.])(\d+(?:\.\d+)?)[\s_]*({UNIT_ALTERNATION})(?:[^0-9A-Za-z]|$)"
    ))
    .expect("Time search pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Hours,
    Minutes,
    Days,
}

impl TimeUnit {
    /// Case-insensitive unit token, singular or plural.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "h" | "hr" | "hrs" | "hour" | "hours" => Some(TimeUnit::Hours),
            "min" | "mins" | "minute" | "minutes" => Some(TimeUnit::Minutes),
            "d" | "day" | "days" => Some(TimeUnit::Days),
            _ => None,
        }
    }

    pub fn to_hours(
        &self,
        value: HoursType,
    ) -> HoursType {
        match self {
            TimeUnit::Hours => value,
            TimeUnit::Minutes => value / 60.0,
            TimeUnit::Days => value * 24.0,
        }
    }
}

impl Display for TimeUnit {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            TimeUnit::Hours => write!(f, "h"),
            TimeUnit::Minutes => write!(f, "min"),
            TimeUnit::Days => write!(f, "d"),
        }
    }
}

/// Extracts `<number><unit>` durations and normalizes them to hours.
///
/// Malformed expressions are logged and reported as `None`.
pub struct TimeParser;

impl TimeParser {
    fn hours_from(captures: &Captures) -> Option<HoursType> {
        let unit = captures
            .get(2)
            .and_then(|m| TimeUnit::from_token(m.as_str()))?;
        let Some(value) = captures.get(1) else {
            debug!(
                "Time unit '{}' without a numeric value",
                captures.get(2).map(|m| m.as_str()).unwrap_or_default()
            );
            return None;
        };
        match value.as_str().parse::<HoursType>() {
            Ok(value) => Some(unit.to_hours(value)),
            Err(e) => {
                debug!("Could not read time value '{}': {}", value.as_str(), e);
                None
            },
        }
    }

    /// Splits a leading time expression and its separator off `text`.
    ///
    /// Returns the hours and the remainder, or `(None, text)` when `text`
    /// does not start with a complete expression. Calling this again on the
    /// remainder of an identifier gives `(None, remainder)`.
    pub fn split_prefix(text: &str) -> (Option<HoursType>, &str) {
        let Some(captures) = TIME_PREFIX.captures(text) else {
            return (None, text);
        };
        match Self::hours_from(&captures) {
            Some(hours) => {
                let consumed = captures.get(0).map(|m| m.end()).unwrap_or(0);
                (Some(hours), &text[consumed..])
            },
            None => (None, text),
        }
    }

    /// Hours of the first time expression in `text`.
    pub fn parse(text: &str) -> Option<HoursType> {
        let text = text.trim();
        if let (Some(hours), _) = Self::split_prefix(text) {
            return Some(hours);
        }
        let hours = TIME_ANYWHERE
            .captures(text)
            .and_then(|captures| Self::hours_from(&captures));
        if hours.is_none() {
            debug!("No time expression in '{}'", text);
        }
        hours
    }
}

//! Recurrence interval parsing.
//!
//! Intervals are written the way operators type them into a schedule form:
//! `"24h"`, `"90m"`, `"1h30m"`, `"0.5h"`, or a bare number meaning hours
//! (`"6"` is six hours). Seconds (`"45s"`) are accepted for completeness.

use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    #[error("interval is empty")]
    Empty,
    #[error("invalid number in interval {0:?}")]
    InvalidNumber(String),
    #[error("unknown unit {unit:?} in interval {input:?}")]
    UnknownUnit { input: String, unit: String },
    #[error("interval {0:?} exceeds the maximum of {MAX_INTERVAL_DAYS} days")]
    TooLarge(String),
}

/// Longest accepted interval.
pub const MAX_INTERVAL_DAYS: u64 = 36_500;

const MAX_INTERVAL: Duration = Duration::from_secs(MAX_INTERVAL_DAYS * 86_400);

/// Parse an interval string into a duration.
pub fn parse_interval(raw: &str) -> Result<Duration, IntervalError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(IntervalError::Empty);
    }

    // A bare number has no unit suffix and is read as hours.
    if let Ok(hours) = input.parse::<f64>() {
        return seconds_to_duration(input, hours * 3600.0);
    }

    let mut total_secs = 0.0_f64;
    let mut rest = input;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(IntervalError::InvalidNumber(input.to_string()));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| IntervalError::InvalidNumber(input.to_string()))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        let scale = match unit {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            _ => {
                return Err(IntervalError::UnknownUnit {
                    input: input.to_string(),
                    unit: unit.to_string(),
                })
            }
        };
        total_secs += value * scale;
        rest = &rest[unit_end..];
    }

    seconds_to_duration(input, total_secs)
}

fn seconds_to_duration(input: &str, secs: f64) -> Result<Duration, IntervalError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(IntervalError::InvalidNumber(input.to_string()));
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(parsed) if parsed <= MAX_INTERVAL => Ok(parsed),
        _ => Err(IntervalError::TooLarge(input.to_string())),
    }
}

/// Interval actually used for rescheduling: the parsed value raised to
/// `floor`. Malformed input yields `floor` so a bad string can never cause
/// a task to re-fire on every tick. An interval over the maximum is returned
/// as an error; the task has no next run.
pub fn effective_interval(raw: &str, floor: Duration) -> Result<Duration, IntervalError> {
    match parse_interval(raw) {
        Ok(parsed) if parsed >= floor => Ok(parsed),
        Ok(parsed) => {
            warn!(
                interval = raw,
                parsed_secs = parsed.as_secs(),
                floor_secs = floor.as_secs(),
                "interval below minimum, using floor"
            );
            Ok(floor)
        }
        Err(e @ IntervalError::TooLarge(_)) => Err(e),
        Err(e) => {
            warn!(interval = raw, error = %e, floor_secs = floor.as_secs(), "malformed interval, using floor");
            Ok(floor)
        }
    }
}

//! Wall-clock arithmetic for late arrivals.

use crate::error::{AttendanceError, Result};

pub const DEFAULT_EXPECTED_TIME: &str = "07:00";

/// Minutes since midnight on a 24-hour clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
}

impl ClockTime {
    pub fn total_minutes(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

pub fn parse_clock(value: &str) -> Result<ClockTime> {
    let t = value.trim();
    let Some((h, m)) = t.split_once(':') else {
        return Err(AttendanceError::invalid_time(value, "expected HH:MM"));
    };
    let hour = clock_part(value, h, "hour")?;
    let minute = clock_part(value, m, "minute")?;
    if hour > 23 {
        return Err(AttendanceError::invalid_time(value, "hour must be between 00 and 23"));
    }
    if minute > 59 {
        return Err(AttendanceError::invalid_time(value, "minute must be between 00 and 59"));
    }
    Ok(ClockTime { hour, minute })
}

/// One or two ASCII digits. Rejects signs, padding beyond two digits and blanks.
fn clock_part(value: &str, part: &str, what: &str) -> Result<u32> {
    if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AttendanceError::invalid_time(
            value,
            format!("{what} must be one or two digits"),
        ));
    }
    part.parse::<u32>()
        .map_err(|_| AttendanceError::invalid_time(value, format!("{what} must be numeric")))
}

/// Minutes between `expected_time` and `arrival_time`, clamped at zero.
///
/// Both values are taken to be on the same calendar day.
pub fn compute_late_minutes(arrival_time: &str, expected_time: &str) -> Result<u32> {
    let arrival = parse_clock(arrival_time)?;
    let expected = parse_clock(expected_time)?;
    Ok(arrival.total_minutes().saturating_sub(expected.total_minutes()))
}

pub fn compute_late_minutes_default(arrival_time: &str) -> Result<u32> {
    compute_late_minutes(arrival_time, DEFAULT_EXPECTED_TIME)
}

/// Arabic rendering of a minute count, e.g. `1 ساعة و 5 دقيقة`.
pub fn format_minutes(minutes: u32) -> String {
    let hours = minutes / 60;
    let rest = minutes % 60;
    match (hours, rest) {
        (0, m) => format!("{m} دقيقة"),
        (h, 0) => format!("{h} ساعة"),
        (h, m) => format!("{h} ساعة و {m} دقيقة"),
    }
}

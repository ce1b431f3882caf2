//! ISO-8601 duration parsing for self-destruct TTLs (`PT6H`, `P1DT30M`, ...).
//!
//! Calendar units are approximated: a year is 365 days, a month 30 days.
//! Only the last (smallest) unit present may carry a fraction.

use chrono::TimeDelta;

use crate::error::{DbTestError, Result};

const SECS_PER_MINUTE: f64 = 60.0;
const SECS_PER_HOUR: f64 = 3_600.0;
const SECS_PER_DAY: f64 = 86_400.0;

pub fn parse_iso8601_duration(text: &str) -> Result<TimeDelta> {
    let invalid = || DbTestError::InvalidDuration(text.to_string());

    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix('P')
        .or_else(|| trimmed.strip_prefix('p'))
        .ok_or_else(invalid)?;

    let (date_part, time_part) = match body.find(['T', 't']) {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    };

    if date_part.is_empty() && time_part.is_none_or(str::is_empty) {
        return Err(invalid());
    }
    if time_part == Some("") {
        return Err(invalid());
    }

    let mut parts: Vec<(f64, f64)> = Vec::new();
    for (value, unit) in components(date_part).map_err(|_| invalid())? {
        let scale = match unit {
            'Y' => 365.0 * SECS_PER_DAY,
            'M' => 30.0 * SECS_PER_DAY,
            'W' => 7.0 * SECS_PER_DAY,
            'D' => SECS_PER_DAY,
            _ => return Err(invalid()),
        };
        parts.push((value, scale));
    }
    for (value, unit) in components(time_part.unwrap_or_default()).map_err(|_| invalid())? {
        let scale = match unit {
            'H' => SECS_PER_HOUR,
            'M' => SECS_PER_MINUTE,
            'S' => 1.0,
            _ => return Err(invalid()),
        };
        parts.push((value, scale));
    }

    // fractions are only allowed on the smallest unit present
    let last = parts.len().saturating_sub(1);
    let mut total_secs = 0.0_f64;
    for (i, (value, scale)) in parts.into_iter().enumerate() {
        if value.fract() != 0.0 && i != last {
            return Err(invalid());
        }
        total_secs += value * scale;
    }

    let millis = (total_secs * 1_000.0).round();
    if !millis.is_finite() || millis > i64::MAX as f64 {
        return Err(invalid());
    }
    TimeDelta::try_milliseconds(millis as i64).ok_or_else(invalid)
}

/// Split `12H30M` into `[(12.0, 'H'), (30.0, 'M')]`.
fn components(section: &str) -> std::result::Result<Vec<(f64, char)>, ()> {
    let mut out = Vec::new();
    let mut number = String::new();
    for ch in section.chars() {
        if ch.is_ascii_digit() || ch == '.' || ch == ',' {
            number.push(if ch == ',' { '.' } else { ch });
            continue;
        }
        if number.is_empty() {
            return Err(());
        }
        let value: f64 = number.parse().map_err(|_| ())?;
        out.push((value, ch.to_ascii_uppercase()));
        number.clear();
    }
    if !number.is_empty() {
        return Err(());
    }
    Ok(out)
}

//! Go-style duration strings (`"10s"`, `"1m30s"`, `"500ms"`).
//!
//! Container labels and the registry's check definitions both express
//! intervals this way, so parsing happens once at the boundary and the
//! rest of the engine compares plain `Duration`s.

use std::time::Duration;

use thiserror::Error;

/// Duration parse errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration '{0}'")]
    Invalid(String),

    #[error("missing unit in duration '{0}'")]
    MissingUnit(String),

    #[error("unknown unit '{unit}' in duration '{input}'")]
    UnknownUnit { unit: String, input: String },

    #[error("duration '{0}' is out of range")]
    Overflow(String),

    #[error("duration '{0}' must be positive")]
    Zero(String),
}

fn nanos_per_unit(unit: &str) -> Option<u64> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return None,
    })
}

/// Parses a Go-style duration. A bare `"0"` is accepted; negative values are not.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let overflow = || DurationError::Overflow(s.to_string());

    let mut total: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !is_number(c))
            .ok_or_else(|| DurationError::MissingUnit(s.to_string()))?;
        let (number, tail) = rest.split_at(num_end);
        if number.is_empty() {
            return Err(DurationError::Invalid(s.to_string()));
        }

        let unit_end = tail.find(is_number).unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);
        let scale = nanos_per_unit(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: s.to_string(),
        })?;

        let nanos = match number.parse::<u64>() {
            Ok(whole) => whole.checked_mul(scale).ok_or_else(overflow)?,
            Err(_) => {
                let value: f64 = number
                    .parse()
                    .map_err(|_| DurationError::Invalid(s.to_string()))?;
                let nanos = (value * scale as f64).round();
                if !nanos.is_finite() || nanos >= u64::MAX as f64 {
                    return Err(overflow());
                }
                nanos as u64
            }
        };

        total = total.checked_add(nanos).ok_or_else(overflow)?;
        rest = next;
    }

    Ok(Duration::from_nanos(total))
}

/// Formats a duration in the largest unit that represents it exactly.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    if d.subsec_nanos() == 0 {
        return format!("{}s", d.as_secs());
    }
    if d.subsec_nanos() % 1_000_000 == 0 {
        return format!("{}ms", d.as_millis());
    }
    if d.subsec_nanos() % 1_000 == 0 {
        return format!("{}us", d.as_micros());
    }
    format!("{}ns", d.as_nanos())
}

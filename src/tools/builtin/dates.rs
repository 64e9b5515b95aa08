//! Clock readings and date arithmetic.
//!
//! Dates are either naive (`2023-12-07`, `2023-12-07T10:30:00`) or carry a
//! UTC offset (`2023-12-07T10:30:00+02:00`, `...Z`). Arithmetic preserves
//! whichever form was given; `days_between` refuses to mix the two.

use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc,
};
use serde_json::Value;

use super::{optional_str, string_arg, Args};
use crate::tools::{ToolContext, ToolError};

const MICROS_PER_HOUR: f64 = 3_600_000_000.0;
const MICROS_PER_DAY: f64 = 86_400_000_000.0;
const SECONDS_PER_DAY: i64 = 86_400;

/// Checks a strftime pattern, then runs `render` to expand it.
fn strftime(
    pattern: &str,
    render: impl FnOnce(&mut String) -> std::fmt::Result,
) -> Result<String, ToolError> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(ToolError::new(format!("Invalid custom format: {pattern}")));
    }
    let mut out = String::new();
    render(&mut out).map_err(|_| ToolError::new(format!("Invalid custom format: {pattern}")))?;
    Ok(out)
}

pub(super) fn time(_: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    let format = optional_str(args, "format").unwrap_or("iso");
    let utc = optional_str(args, "timezone") == Some("utc");

    let text = match format {
        "iso" if utc => Utc::now().to_rfc3339(),
        "iso" => Local::now().to_rfc3339(),
        "unix" => Utc::now().timestamp().to_string(),
        "human" if utc => Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        "human" => Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        "utc" => Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        "local" => Local::now().to_rfc3339(),
        "custom" => {
            let pattern = optional_str(args, "custom_format")
                .ok_or_else(|| ToolError::new("custom_format is required when format='custom'"))?;
            strftime(pattern, |out| {
                if utc {
                    write!(out, "{}", Utc::now().format(pattern))
                } else {
                    write!(out, "{}", Local::now().format(pattern))
                }
            })?
        }
        other => return Err(ToolError::new(format!("Unknown time format: {other}"))),
    };
    Ok(Value::String(text))
}

/// A date as supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Moment {
    Naive(NaiveDateTime),
    Offset(DateTime<FixedOffset>),
}

impl Moment {
    fn parse(text: &str) -> Result<Self, ToolError> {
        let invalid = || ToolError::new(format!("Invalid date format: {text}"));

        if !text.contains('T') {
            return NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(Self::Naive)
                .ok_or_else(invalid);
        }

        let text = text.replace('Z', "+00:00");
        for pattern in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"] {
            if let Ok(parsed) = DateTime::parse_from_str(&text, pattern) {
                return Ok(Self::Offset(parsed));
            }
        }
        for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(&text, pattern) {
                return Ok(Self::Naive(parsed));
            }
        }
        Err(invalid())
    }

    fn shift(self, delta: Duration) -> Result<Self, ToolError> {
        let shifted = match self {
            Self::Naive(dt) => dt.checked_add_signed(delta).map(Self::Naive),
            Self::Offset(dt) => dt.checked_add_signed(delta).map(Self::Offset),
        };
        shifted.ok_or_else(|| ToolError::new("Resulting date is out of range"))
    }

    fn render(self, output_format: &str) -> Result<String, ToolError> {
        let pattern = match output_format {
            "iso" => return Ok(self.iso()),
            "human" => "%Y-%m-%d %H:%M:%S",
            "date_only" => "%Y-%m-%d",
            custom => custom,
        };
        strftime(pattern, |out| match self {
            Self::Naive(dt) => write!(out, "{}", dt.format(pattern)),
            Self::Offset(dt) => write!(out, "{}", dt.format(pattern)),
        })
    }

    /// ISO 8601 with microseconds only when present, offset only when known.
    fn iso(self) -> String {
        match self {
            Self::Naive(dt) => iso_timestamp(dt),
            Self::Offset(dt) => format!("{}{}", iso_timestamp(dt.naive_local()), dt.format("%:z")),
        }
    }
}

/// Renders a naive timestamp as `YYYY-MM-DDTHH:MM:SS[.ffffff]`.
pub(super) fn iso_timestamp(dt: NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

/// Converts a fractional count of units to a duration, rounded to the
/// nearest microsecond.
#[allow(clippy::cast_possible_truncation)]
fn duration(amount: f64, micros_per_unit: f64) -> Result<Duration, ToolError> {
    // Below i64::MAX microseconds.
    const MAX_MICROS: f64 = 9.0e18;
    let micros = (amount * micros_per_unit).round();
    if !micros.is_finite() || micros.abs() > MAX_MICROS {
        return Err(ToolError::new(format!("amount {amount} is out of range")));
    }
    Ok(Duration::microseconds(micros as i64))
}

/// Whole days from `start` to `end`, rounded toward negative infinity.
fn days_between(start: Moment, end: Moment) -> Result<i64, ToolError> {
    let delta = match (start, end) {
        (Moment::Naive(a), Moment::Naive(b)) => b - a,
        (Moment::Offset(a), Moment::Offset(b)) => b - a,
        _ => {
            return Err(ToolError::new(
                "cannot compare a date that has a UTC offset with one that does not",
            ))
        }
    };
    let mut seconds = delta.num_seconds();
    if delta < Duration::seconds(seconds) {
        seconds -= 1;
    }
    Ok(seconds.div_euclid(SECONDS_PER_DAY))
}

pub(super) fn time_calculator(_: &ToolContext, args: &Args) -> Result<Value, ToolError> {
    calculate(args).map_err(|e| ToolError::new(format!("Time calculation error: {e}")))
}

fn calculate(args: &Args) -> Result<Value, ToolError> {
    let operation = string_arg(args, "operation")?;

    if operation == "days_between" {
        let (Some(start), Some(end)) = (optional_str(args, "date"), optional_str(args, "end_date"))
        else {
            return Err(ToolError::new(
                "Both date and end_date are required for days_between operation",
            ));
        };
        return days_between(Moment::parse(start)?, Moment::parse(end)?).map(Value::from);
    }

    let date = match optional_str(args, "date") {
        Some(text) => Moment::parse(text)?,
        None => Moment::Naive(Local::now().naive_local()),
    };
    let amount = || {
        args.get("amount")
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::new(format!("amount is required for {operation} operation")))
    };

    let result = match operation {
        "add_days" => date.shift(duration(amount()?, MICROS_PER_DAY)?)?,
        "subtract_days" => date.shift(duration(-amount()?, MICROS_PER_DAY)?)?,
        "add_hours" => date.shift(duration(amount()?, MICROS_PER_HOUR)?)?,
        "subtract_hours" => date.shift(duration(-amount()?, MICROS_PER_HOUR)?)?,
        "format_date" => date,
        other => return Err(ToolError::new(format!("Unknown operation: {other}"))),
    };

    let output_format = optional_str(args, "output_format").unwrap_or("iso");
    result.render(output_format).map(Value::String)
}

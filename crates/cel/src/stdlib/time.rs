//! Timestamp and duration construction, parsing, and component accessors.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::diagnostics::{EvalError, EvalErrorKind};
use crate::env::{Env, Overload};
use crate::types::CelType;
use crate::value::{Duration, Timestamp, Value};

use super::native;

pub fn register(env: &mut Env) {
    env.declare_function("timestamp", Overload::global("timestamp", vec![CelType::String], CelType::Timestamp), Some(native(timestamp)));
    env.declare_function("duration", Overload::global("duration", vec![CelType::String], CelType::Duration), Some(native(duration)));
    env.declare_function(
        "getFullYear",
        Overload::instance("getFullYear", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getFullYear", |dt| i64::from(dt.year())))),
    );
    env.declare_function(
        "getMonth",
        Overload::instance("getMonth", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getMonth", |dt| i64::from(dt.month0())))),
    );
    env.declare_function(
        "getDayOfMonth",
        Overload::instance("getDayOfMonth", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getDayOfMonth", |dt| i64::from(dt.day0())))),
    );
    env.declare_function(
        "getHours",
        Overload::instance("getHours", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getHours", |dt| i64::from(dt.hour())))),
    );
    env.declare_function(
        "getMinutes",
        Overload::instance("getMinutes", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getMinutes", |dt| i64::from(dt.minute())))),
    );
    env.declare_function(
        "getSeconds",
        Overload::instance("getSeconds", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getSeconds", |dt| i64::from(dt.second())))),
    );
    env.declare_function(
        "getMilliseconds",
        Overload::instance("getMilliseconds", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getMilliseconds", |dt| i64::from(dt.timestamp_subsec_millis())))),
    );
    env.declare_function(
        "getDate",
        Overload::instance("getDate", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getDate", |dt| i64::from(dt.day())))),
    );
    env.declare_function(
        "getDayOfWeek",
        Overload::instance("getDayOfWeek", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getDayOfWeek", |dt| i64::from(dt.weekday().num_days_from_sunday())))),
    );
    env.declare_function(
        "getDayOfYear",
        Overload::instance("getDayOfYear", vec![CelType::Timestamp], CelType::Int),
        Some(native(|a| component(a, "getDayOfYear", |dt| i64::from(dt.ordinal0())))),
    );
}

fn timestamp(args: &[Value]) -> Result<Value, EvalError> {
    let Value::String(s) = &args[0] else {
        return Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, "timestamp() requires a string argument"));
    };
    parse_timestamp_literal(s).map(Value::Timestamp).map_err(|e| EvalError::anonymous(EvalErrorKind::BadFormat, e))
}

pub(crate) fn parse_timestamp_literal(s: &str) -> Result<Timestamp, String> {
    let dt = DateTime::parse_from_rfc3339(s).map_err(|e| e.to_string())?;
    Ok(Timestamp { seconds: dt.timestamp(), nanos: dt.timestamp_subsec_nanos() as i32 })
}

fn duration(args: &[Value]) -> Result<Value, EvalError> {
    let Value::String(s) = &args[0] else {
        return Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, "duration() requires a string argument"));
    };
    parse_duration_literal(s).map(Value::Duration).map_err(|e| EvalError::anonymous(EvalErrorKind::BadFormat, e))
}

/// Parses a Go-style duration literal (`"72h3m0.5s"`), the format CEL's
/// `duration()` accepts. Units: `h`, `m`, `s`, `ms`, `us`, `ns`.
pub(crate) fn parse_duration_literal(s: &str) -> Result<Duration, String> {
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (-1i128, rest),
        None => (1i128, s),
    };
    if rest.is_empty() {
        return Err("empty duration literal".to_owned());
    }
    let mut total_nanos: i128 = 0;
    let mut chars = rest.char_indices().peekable();
    let mut num_start = 0;
    while let Some(&(i, c)) = chars.peek() {
        if c.is_ascii_digit() || c == '.' {
            chars.next();
            continue;
        }
        let number: f64 = rest[num_start..i].parse().map_err(|_| format!("invalid number in duration literal '{s}'"))?;
        let unit_start = i;
        while let Some(&(_, uc)) = chars.peek() {
            if uc.is_ascii_digit() || uc == '.' {
                break;
            }
            chars.next();
        }
        let unit_end = chars.peek().map_or(rest.len(), |&(j, _)| j);
        let unit = &rest[unit_start..unit_end];
        let nanos_per_unit: f64 = match unit {
            "h" => 3_600_000_000_000.0,
            "m" => 60_000_000_000.0,
            "s" => 1_000_000_000.0,
            "ms" => 1_000_000.0,
            "us" | "\u{3bc}s" => 1_000.0,
            "ns" => 1.0,
            other => return Err(format!("unrecognized duration unit '{other}' in '{s}'")),
        };
        total_nanos += (number * nanos_per_unit).round() as i128;
        num_start = unit_end;
    }
    if num_start != rest.len() {
        return Err(format!("trailing characters in duration literal '{s}'"));
    }
    Ok(Duration { nanos: sign * total_nanos })
}

fn component(args: &[Value], name: &str, f: impl Fn(DateTime<Tz>) -> i64) -> Result<Value, EvalError> {
    let Value::Timestamp(ts) = &args[0] else {
        return Err(EvalError::anonymous(EvalErrorKind::NoMatchingOverload, format!("'{name}' requires a timestamp receiver")));
    };
    let tz: Tz = if let Some(Value::String(name)) = args.get(1) {
        name.parse().map_err(|_| EvalError::anonymous(EvalErrorKind::BadFormat, format!("unknown time zone '{name}'")))?
    } else {
        chrono_tz::UTC
    };
    let utc = Utc
        .timestamp_opt(ts.seconds, u32::try_from(ts.nanos).unwrap_or(0))
        .single()
        .ok_or_else(|| EvalError::anonymous(EvalErrorKind::BadFormat, "timestamp out of range"))?;
    Ok(Value::Int(f(utc.with_timezone(&tz))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_duration_literal() {
        let d = parse_duration_literal("1h30m").unwrap();
        assert_eq!(d.nanos, 90 * 60 * 1_000_000_000);
    }

    #[test]
    fn parses_negative_duration_literal() {
        let d = parse_duration_literal("-1s").unwrap();
        assert_eq!(d.nanos, -1_000_000_000);
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_duration_literal("5z").is_err());
    }

    #[test]
    fn parses_rfc3339_timestamp() {
        let ts = parse_timestamp_literal("2023-01-01T00:00:00Z").unwrap();
        assert_eq!(ts.seconds, 1_672_531_200);
    }

    #[test]
    fn component_accessors_cover_date_week_year_and_millis() {
        // 2023-01-01 is a Sunday, the first day of the year.
        let ts = parse_timestamp_literal("2023-01-01T12:30:45.250Z").unwrap();
        let args = [Value::Timestamp(ts)];
        assert_eq!(component(&args, "getDate", |dt| i64::from(dt.day())).unwrap(), Value::Int(1));
        assert_eq!(component(&args, "getDayOfWeek", |dt| i64::from(dt.weekday().num_days_from_sunday())).unwrap(), Value::Int(0));
        assert_eq!(component(&args, "getDayOfYear", |dt| i64::from(dt.ordinal0())).unwrap(), Value::Int(0));
        assert_eq!(component(&args, "getMilliseconds", |dt| i64::from(dt.timestamp_subsec_millis())).unwrap(), Value::Int(250));
    }
}

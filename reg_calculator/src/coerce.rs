//! Total coercions from loosely typed feed values into the typed record fields.
//!
//! Nothing in here fails: anything that cannot be read becomes `None`, and the
//! caller decides the default.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use polars::prelude::*;

use crate::models::NEUTRAL_MILEAGE_RATIO;

/// RegA mileage below this magnitude is treated as unmeasured.
pub const MIN_MEASURABLE_MILEAGE: f64 = 1e-9;

const TIMESTAMP_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
];

pub fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Parse a price or mileage cell. Thousands separators and a leading `$` are tolerated.
pub fn parse_f64(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().and_then(finite)
}

/// Parse a market timestamp. Offsets are dropped, the wall-clock time is kept.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.naive_local());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

pub fn floor_to_hour(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp
        .date()
        .and_hms_opt(timestamp.hour(), 0, 0)
        .unwrap_or(timestamp)
}

pub fn epoch_to_naive(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let (per_second, nanos_per_unit) = match unit {
        TimeUnit::Nanoseconds => (1_000_000_000, 1),
        TimeUnit::Microseconds => (1_000_000, 1_000),
        TimeUnit::Milliseconds => (1_000, 1_000_000),
    };
    let seconds = value.div_euclid(per_second);
    let nanos = (value.rem_euclid(per_second) * nanos_per_unit) as u32;
    DateTime::from_timestamp(seconds, nanos).map(|dt| dt.naive_utc())
}

pub fn naive_to_epoch_millis(timestamp: NaiveDateTime) -> i64 {
    timestamp.and_utc().timestamp_millis()
}

/// RegD mileage over RegA mileage, or the neutral ratio when that is undefined.
pub fn mileage_ratio(regd: Option<f64>, rega: Option<f64>) -> f64 {
    match (regd, rega) {
        (Some(regd), Some(rega)) if rega.abs() >= MIN_MEASURABLE_MILEAGE => {
            sanitize_ratio(regd / rega)
        }
        _ => NEUTRAL_MILEAGE_RATIO,
    }
}

/// Finite and positive, or neutral.
pub fn sanitize_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() && ratio > 0.0 {
        ratio
    } else {
        NEUTRAL_MILEAGE_RATIO
    }
}

/// Read any column as floats. Strings are parsed, numerics cast, the rest is `None`.
pub fn f64_values(series: &Series) -> Vec<Option<f64>> {
    let len = series.len();
    if let DataType::String = series.dtype() {
        return match series.str() {
            Ok(values) => values
                .into_iter()
                .map(|value| value.and_then(parse_f64))
                .collect(),
            Err(_) => vec![None; len],
        };
    }
    let Ok(cast) = series.cast(&DataType::Float64) else {
        return vec![None; len];
    };
    match cast.f64() {
        Ok(values) => values
            .into_iter()
            .map(|value| value.and_then(finite))
            .collect(),
        Err(_) => vec![None; len],
    }
}

/// Read any column as naive timestamps. Bare integers are taken as epoch milliseconds.
pub fn timestamp_values(series: &Series) -> Vec<Option<NaiveDateTime>> {
    let len = series.len();
    match series.dtype() {
        DataType::String => match series.str() {
            Ok(values) => values
                .into_iter()
                .map(|value| value.and_then(parse_timestamp))
                .collect(),
            Err(_) => vec![None; len],
        },
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            i64_values(series)
                .map(|values| {
                    values
                        .into_iter()
                        .map(|value| value.and_then(|v| epoch_to_naive(v, unit)))
                        .collect()
                })
                .unwrap_or_else(|| vec![None; len])
        }
        DataType::Date => match series.cast(&DataType::Int32) {
            Ok(days) => match days.i32() {
                Ok(days) => days
                    .into_iter()
                    .map(|day| {
                        day.and_then(|d| {
                            NaiveDate::from_num_days_from_ce_opt(d + 719_163)
                                .and_then(|date| date.and_hms_opt(0, 0, 0))
                        })
                    })
                    .collect(),
                Err(_) => vec![None; len],
            },
            Err(_) => vec![None; len],
        },
        dtype if dtype.is_integer() => i64_values(series)
            .map(|values| {
                values
                    .into_iter()
                    .map(|value| value.and_then(|v| epoch_to_naive(v, TimeUnit::Milliseconds)))
                    .collect()
            })
            .unwrap_or_else(|| vec![None; len]),
        _ => vec![None; len],
    }
}

fn i64_values(series: &Series) -> Option<Vec<Option<i64>>> {
    let cast = series.cast(&DataType::Int64).ok()?;
    let values = cast.i64().ok()?;
    Some(values.into_iter().collect())
}

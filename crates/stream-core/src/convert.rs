//! Text to value conversion shared by scan operators and plan loaders.
//!
//! Bad data is not an error: empty fields, the `NA` sentinel and text that
//! does not parse all convert to `None`. Asking for a target type that has
//! no text representation is a schema problem and fails immediately.

use crate::error::{Result, StreamError};
use crate::types::{DataType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::trace;

const MISSING_SENTINELS: [&str; 2] = ["", "NA"];

const TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

pub fn convert(target: &DataType, raw: &str) -> Result<Option<Value>> {
    if *target == DataType::Binary {
        return Err(StreamError::UnsupportedConversion(target.name().to_string()));
    }

    let text = raw.trim();
    if MISSING_SENTINELS.contains(&text) {
        return Ok(None);
    }

    let value = match target {
        DataType::Boolean => parse_bool(text).map(Value::Boolean),
        DataType::Int32 => text.parse::<i32>().ok().map(Value::Int32),
        DataType::Int64 => text.parse::<i64>().ok().map(Value::Int64),
        DataType::Float32 => text.parse::<f32>().ok().map(Value::Float32),
        DataType::Float64 => text.parse::<f64>().ok().map(Value::Float64),
        DataType::Utf8 => Some(Value::Utf8(text.to_string())),
        DataType::Timestamp => parse_timestamp(text).map(Value::Timestamp),
        DataType::Binary => None,
    };

    if value.is_none() {
        trace!("could not convert '{}' to {}", text, target);
    }
    Ok(value)
}

/// Like [`convert`], with missing values mapped to [`Value::Null`].
pub fn convert_or_null(target: &DataType, raw: &str) -> Result<Value> {
    Ok(convert(target, raw)?.unwrap_or(Value::Null))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "1" => Some(true),
        "false" | "f" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    text.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.naive_utc())
}

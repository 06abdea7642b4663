//! Tolerant field deserializers for feed payloads.
//!
//! The feed mixes numeric strings, bare numbers, empty strings and nulls for
//! the same field. Decimals are parsed from their textual form so they never
//! pass through binary floating point.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// Seconds/milliseconds cutoff for numeric timestamps.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Parse a decimal from its textual form, accepting scientific notation.
///
/// # Errors
///
/// Returns an error when the text is not a valid decimal.
pub fn parse_decimal(text: &str) -> Result<Decimal, rust_decimal::Error> {
    if text.contains(['e', 'E']) {
        Decimal::from_scientific(text)
    } else {
        Decimal::from_str(text)
    }
}

fn absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Optional decimal from a number, numeric string, empty string or null.
pub fn decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if absent(&value) {
        return Ok(None);
    }
    match value {
        Value::String(s) => parse_decimal(s.trim()).map(Some).map_err(de::Error::custom),
        Value::Number(n) => parse_decimal(&n.to_string())
            .map(Some)
            .map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected decimal, got {other}"))),
    }
}

/// Optional non-negative count from a number or numeric string.
pub fn count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if absent(&value) {
        return Ok(None);
    }
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            })
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected count, got {n}"))),
        Value::String(s) => s.trim().parse::<u64>().map(Some).map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected count, got {other}"))),
    }
}

/// Optional string from a string or number; empty strings become `None`.
pub fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if absent(&value) {
        return Ok(None);
    }
    match value {
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(de::Error::custom(format!("expected string, got {other}"))),
    }
}

/// Optional timestamp from unix seconds, unix milliseconds or RFC 3339.
pub fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if absent(&value) {
        return Ok(None);
    }
    match value {
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                from_unix(secs)
            } else {
                let secs = n.as_f64().unwrap_or_default();
                from_unix_fractional(secs)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
                return Ok(Some(dt.with_timezone(&Utc)));
            }
            trimmed.parse::<i64>().map_err(de::Error::custom).and_then(from_unix)
        }
        other => Err(de::Error::custom(format!("expected timestamp, got {other}"))),
    }
}

fn from_unix<E: de::Error>(value: i64) -> Result<Option<DateTime<Utc>>, E> {
    let parsed = if value.abs() >= MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    };
    parsed
        .map(Some)
        .ok_or_else(|| E::custom(format!("timestamp out of range: {value}")))
}

#[allow(clippy::cast_possible_truncation)]
fn from_unix_fractional<E: de::Error>(secs: f64) -> Result<Option<DateTime<Utc>>, E> {
    if !secs.is_finite() {
        return Err(E::custom("timestamp is not finite"));
    }
    let millis = (secs * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(Some)
        .ok_or_else(|| E::custom(format!("timestamp out of range: {secs}")))
}

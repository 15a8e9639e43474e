use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

/// Display value for timestamps that are missing or cannot be decoded.
pub const NOT_AVAILABLE: &str = "N/A";

/// 2000-01-01T00:00:00Z in milliseconds. Values of unusual length above this
/// are read as milliseconds, everything else as seconds.
const MILLIS_CUTOFF: i64 = 946_684_800_000;

/// Epoch value as it arrives from the backend: a number, a numeric string, or nothing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    #[default]
    Missing,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RawTimestamp {
    fn is_falsy(&self) -> bool {
        match self {
            RawTimestamp::Missing => true,
            RawTimestamp::Integer(value) => *value == 0,
            RawTimestamp::Float(value) => *value == 0.0 || value.is_nan(),
            RawTimestamp::Text(text) => text.is_empty(),
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            RawTimestamp::Missing => None,
            RawTimestamp::Integer(value) => Some(*value),
            RawTimestamp::Float(value) => {
                if !value.is_finite() {
                    return None;
                }
                let truncated = value.trunc();
                if truncated.abs() >= i64::MAX as f64 {
                    None
                } else {
                    Some(truncated as i64)
                }
            }
            RawTimestamp::Text(text) => parse_integer_prefix(text),
        }
    }
}

impl From<i64> for RawTimestamp {
    fn from(value: i64) -> Self {
        RawTimestamp::Integer(value)
    }
}

impl From<f64> for RawTimestamp {
    fn from(value: f64) -> Self {
        RawTimestamp::Float(value)
    }
}

impl From<&str> for RawTimestamp {
    fn from(value: &str) -> Self {
        RawTimestamp::Text(value.to_string())
    }
}

impl From<String> for RawTimestamp {
    fn from(value: String) -> Self {
        RawTimestamp::Text(value)
    }
}

impl<T: Into<RawTimestamp>> From<Option<T>> for RawTimestamp {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Converts a 10-digit (seconds) or 13-digit (milliseconds) epoch value into
/// a `DD/MM/YYYY` date using UTC fields. Never panics; anything that cannot be
/// decoded yields [`NOT_AVAILABLE`].
pub fn normalize(raw: &RawTimestamp) -> String {
    if raw.is_falsy() {
        return NOT_AVAILABLE.to_string();
    }
    let Some(value) = raw.as_integer() else {
        return NOT_AVAILABLE.to_string();
    };
    to_epoch_millis(value)
        .and_then(format_millis)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn to_epoch_millis(value: i64) -> Option<i64> {
    match digit_count(value.unsigned_abs()) {
        10 => value.checked_mul(1_000),
        13 => Some(value),
        _ if value > MILLIS_CUTOFF => Some(value),
        _ => value.checked_mul(1_000),
    }
}

fn format_millis(millis: i64) -> Option<String> {
    let nanos = i128::from(millis) * 1_000_000;
    let datetime = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
    datetime
        .format(format_description!("[day]/[month]/[year]"))
        .ok()
}

fn digit_count(mut magnitude: u64) -> u32 {
    if magnitude == 0 {
        return 1;
    }
    let mut digits = 0;
    while magnitude > 0 {
        magnitude /= 10;
        digits += 1;
    }
    digits
}

/// Integer-prefix parsing: leading whitespace, an optional sign, then as many
/// decimal digits as are present. Trailing characters are ignored.
fn parse_integer_prefix(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return None;
    }
    let magnitude: i64 = rest[..digits_len].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

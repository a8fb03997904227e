//! Internal helpers for wire decoding and sync windows.
//!
//! These utilities are **not** part of the public API.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, de};

/// Earliest instant the trading API accepts.
pub fn trading_floor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Start of an incremental window: `latest - overlap`, or `floor` when
/// nothing was stored yet. Never earlier than `floor`.
pub fn window_start(
    latest: Option<DateTime<Utc>>,
    overlap: Duration,
    floor: DateTime<Utc>,
) -> DateTime<Utc> {
    match latest {
        Some(latest) => (latest - overlap).max(floor),
        None => floor,
    }
}

/// Midnight UTC of the day `value` falls in.
pub fn start_of_day(value: DateTime<Utc>) -> DateTime<Utc> {
    value.date_naive().and_time(NaiveTime::MIN).and_utc()
}

pub(crate) fn format_trading_time(value: DateTime<Utc>) -> String {
    value.max(trading_floor()).format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

/// Ids arrive either as JSON numbers or as numeric strings.
pub(crate) fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(id) => id.trim().parse().map_err(de::Error::custom),
    }
}

#[derive(Deserialize)]
struct Milliseconds {
    milliseconds: i64,
}

fn from_millis<E: de::Error>(value: i64) -> Result<DateTime<Utc>, E> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {value}")))
}

/// `{"milliseconds": 1700000000000}`
pub(crate) fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    from_millis(Milliseconds::deserialize(deserializer)?.milliseconds)
}

pub(crate) fn optional_millis<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Option::<Milliseconds>::deserialize(deserializer)?
        .map(|value| from_millis(value.milliseconds))
        .transpose()
}

pub(crate) fn unix_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let value = i64::deserialize(deserializer)?;
    DateTime::from_timestamp(value, 0)
        .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {value}")))
}

//! Price candles of traded tickers.
//!
//! The provider serves at most [`MAX_CANDLE_INTERVAL`] per request, longer
//! ranges are split by [`candle_windows`].

use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::Deserialize;

use crate::util;

pub const DAY_RESOLUTION: &str = "D";

/// Twelve months of thirty days.
pub const MAX_CANDLE_INTERVAL: Duration = Duration::days(12 * 30);

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Candle {
    #[serde(skip)]
    pub ticker: String,
    #[serde(rename = "date", deserialize_with = "util::unix_seconds")]
    pub time: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "v", default)]
    pub volume: f64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CandlesPayload {
    #[serde(default)]
    pub candles: Vec<Candle>,
}

/// Contiguous sub-ranges covering `[start, end)`, each at most `max` long.
pub fn candle_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max: Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    if max <= Duration::zero() {
        return windows;
    }

    let mut from = start;
    while from < end {
        let to = (from + max).min(end);
        windows.push((from, to));
        from = to;
    }
    windows
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "candles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub ticker: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub time: DateTimeUtc,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Candle> for ActiveModel {
    fn from(candle: &Candle) -> Self {
        Self {
            ticker: ActiveValue::Set(candle.ticker.clone()),
            time: ActiveValue::Set(candle.time),
            open: ActiveValue::Set(candle.open),
            close: ActiveValue::Set(candle.close),
            high: ActiveValue::Set(candle.high),
            low: ActiveValue::Set(candle.low),
            volume: ActiveValue::Set(candle.volume),
        }
    }
}

impl From<Model> for Candle {
    fn from(model: Model) -> Self {
        Self {
            ticker: model.ticker,
            time: model.time,
            open: model.open,
            close: model.close,
            high: model.high,
            low: model.low,
            volume: model.volume,
        }
    }
}

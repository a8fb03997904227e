//! Brokerage operations: buys, sells, coupons, taxes, fees.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::Deserialize;

use crate::util;

pub const BUY: &str = "Buy";
pub const SELL: &str = "Sell";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingOperation {
    #[serde(deserialize_with = "util::id")]
    pub id: i64,
    #[serde(skip)]
    pub username: String,
    #[serde(rename = "date")]
    pub time: DateTime<Utc>,
    #[serde(rename = "operationType")]
    pub kind: String,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub instrument_type: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub payment: f64,
    #[serde(default)]
    pub commission: Option<f64>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct TradingOperationsPayload {
    #[serde(default)]
    pub items: Vec<TradingOperation>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trading_operations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub username: String,
    pub time: DateTimeUtc,
    pub kind: String,
    pub ticker: Option<String>,
    pub instrument_type: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<i64>,
    pub payment: f64,
    pub commission: Option<f64>,
    pub currency: String,
    pub description: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&TradingOperation> for ActiveModel {
    fn from(operation: &TradingOperation) -> Self {
        Self {
            id: ActiveValue::Set(operation.id),
            username: ActiveValue::Set(operation.username.clone()),
            time: ActiveValue::Set(operation.time),
            kind: ActiveValue::Set(operation.kind.clone()),
            ticker: ActiveValue::Set(operation.ticker.clone()),
            instrument_type: ActiveValue::Set(operation.instrument_type.clone()),
            price: ActiveValue::Set(operation.price),
            quantity: ActiveValue::Set(operation.quantity),
            payment: ActiveValue::Set(operation.payment),
            commission: ActiveValue::Set(operation.commission),
            currency: ActiveValue::Set(operation.currency.clone()),
            description: ActiveValue::Set(operation.description.clone()),
        }
    }
}

impl From<Model> for TradingOperation {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            time: model.time,
            kind: model.kind,
            ticker: model.ticker,
            instrument_type: model.instrument_type,
            price: model.price,
            quantity: model.quantity,
            payment: model.payment,
            commission: model.commission,
            currency: model.currency,
            description: model.description,
        }
    }
}

/// A ticker held between `buy_time` and `sell_time` (still open when
/// `sell_time` is `None`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TradingPosition {
    pub ticker: String,
    pub buy_time: DateTime<Utc>,
    pub sell_time: Option<DateTime<Utc>>,
}

struct Holding {
    quantity: i64,
    opened: DateTime<Utc>,
    closed: Option<DateTime<Utc>>,
}

/// Replay buys and sells in time order and track, per ticker, when the
/// current holding started and when it was closed.
pub fn positions(operations: &[TradingOperation]) -> Vec<TradingPosition> {
    let mut ordered: Vec<&TradingOperation> = operations
        .iter()
        .filter(|op| op.kind == BUY || op.kind == SELL)
        .collect();
    ordered.sort_by_key(|op| (op.time, op.id));

    let mut book: BTreeMap<String, Holding> = BTreeMap::new();
    for op in ordered {
        let Some(ticker) = op.ticker.as_deref() else {
            continue;
        };
        let quantity = op.quantity.unwrap_or(0);
        let holding = book.entry(ticker.to_string()).or_insert(Holding {
            quantity: 0,
            opened: op.time,
            closed: None,
        });

        if op.kind == BUY {
            if holding.quantity <= 0 {
                holding.opened = op.time;
                holding.closed = None;
            }
            holding.quantity += quantity;
        } else {
            holding.quantity -= quantity;
            if holding.quantity <= 0 {
                holding.closed = Some(op.time);
            }
        }
    }

    book.into_iter()
        .map(|(ticker, holding)| TradingPosition {
            ticker,
            buy_time: holding.opened,
            sell_time: holding.closed,
        })
        .collect()
}

//! Account operations (card payments, transfers, fees...).
//!
//! An operation without a debiting time is still pending: the bank may
//! change it, so pending operations are fetched again on every pass.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::Deserialize;

use crate::util;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(from = "RawOperation")]
pub struct Operation {
    pub id: i64,
    pub account_id: String,
    pub time: DateTime<Utc>,
    pub debiting_time: Option<DateTime<Utc>>,
    pub kind: String,
    pub status: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub category: Option<String>,
    pub mcc: Option<String>,
    pub has_shopping_receipt: bool,
}

impl Operation {
    pub fn is_pending(&self) -> bool {
        self.debiting_time.is_none()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCurrency {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawAmount {
    #[serde(default)]
    currency: RawCurrency,
    #[serde(default)]
    value: f64,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperation {
    #[serde(deserialize_with = "util::id")]
    id: i64,
    account: String,
    #[serde(deserialize_with = "util::millis")]
    operation_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "util::optional_millis")]
    debiting_time: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    amount: RawAmount,
    #[serde(default)]
    spending_category: Option<RawCategory>,
    #[serde(default, rename = "mccString")]
    mcc: Option<String>,
    #[serde(default)]
    has_shopping_receipt: bool,
}

impl From<RawOperation> for Operation {
    fn from(raw: RawOperation) -> Self {
        Self {
            id: raw.id,
            account_id: raw.account,
            time: raw.operation_time,
            debiting_time: raw.debiting_time,
            kind: raw.kind,
            status: raw.status,
            description: raw.description,
            amount: raw.amount.value,
            currency: raw.amount.currency.name,
            category: raw.spending_category.and_then(|c| c.name),
            mcc: raw.mcc.filter(|mcc| !mcc.is_empty()),
            has_shopping_receipt: raw.has_shopping_receipt,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "operations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub account_id: String,
    pub time: DateTimeUtc,
    pub debiting_time: Option<DateTimeUtc>,
    pub kind: String,
    pub status: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub category: Option<String>,
    pub mcc: Option<String>,
    pub has_shopping_receipt: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Operation> for ActiveModel {
    fn from(operation: &Operation) -> Self {
        Self {
            id: ActiveValue::Set(operation.id),
            account_id: ActiveValue::Set(operation.account_id.clone()),
            time: ActiveValue::Set(operation.time),
            debiting_time: ActiveValue::Set(operation.debiting_time),
            kind: ActiveValue::Set(operation.kind.clone()),
            status: ActiveValue::Set(operation.status.clone()),
            description: ActiveValue::Set(operation.description.clone()),
            amount: ActiveValue::Set(operation.amount),
            currency: ActiveValue::Set(operation.currency.clone()),
            category: ActiveValue::Set(operation.category.clone()),
            mcc: ActiveValue::Set(operation.mcc.clone()),
            has_shopping_receipt: ActiveValue::Set(operation.has_shopping_receipt),
        }
    }
}

impl From<Model> for Operation {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            account_id: model.account_id,
            time: model.time,
            debiting_time: model.debiting_time,
            kind: model.kind,
            status: model.status,
            description: model.description,
            amount: model.amount,
            currency: model.currency,
            category: model.category,
            mcc: model.mcc,
            has_shopping_receipt: model.has_shopping_receipt,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_provider_operation() {
        let operation: Operation = serde_json::from_value(json!({
            "id": "1234567890",
            "account": "5001",
            "operationTime": {"milliseconds": 1_700_000_000_000_i64},
            "debitingTime": null,
            "type": "Debit",
            "status": "OK",
            "description": "Coffee",
            "amount": {"currency": {"name": "RUB"}, "value": 250.5},
            "spendingCategory": {"name": "Restaurants"},
            "mccString": "5814",
            "hasShoppingReceipt": true
        }))
        .unwrap();

        assert_eq!(operation.id, 1_234_567_890);
        assert_eq!(operation.account_id, "5001");
        assert_eq!(operation.time.timestamp_millis(), 1_700_000_000_000);
        assert!(operation.is_pending());
        assert_eq!(operation.currency, "RUB");
        assert_eq!(operation.category.as_deref(), Some("Restaurants"));
        assert!(operation.has_shopping_receipt);
    }
}

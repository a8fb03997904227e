//! Daily snapshot of the securities held in the brokerage account.

use chrono::NaiveDate;
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::Deserialize;

#[derive(Clone, Debug, PartialEq)]
pub struct PurchasedSecurity {
    pub username: String,
    pub ticker: String,
    pub security_type: String,
    pub date: NaiveDate,
    pub price: f64,
    pub currency: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawPrice {
    #[serde(default)]
    currency: String,
    #[serde(default)]
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPurchasedSecurity {
    ticker: String,
    #[serde(default)]
    security_type: String,
    #[serde(default)]
    current_price: RawPrice,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PurchasedSecuritiesPayload {
    #[serde(default)]
    pub data: Vec<RawPurchasedSecurity>,
}

impl RawPurchasedSecurity {
    pub(crate) fn stamp(self, username: &str, date: NaiveDate) -> PurchasedSecurity {
        PurchasedSecurity {
            username: username.to_string(),
            ticker: self.ticker,
            security_type: self.security_type,
            date,
            price: self.current_price.value,
            currency: self.current_price.currency,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "purchased_securities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub username: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub ticker: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub security_type: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub date: Date,
    pub price: f64,
    pub currency: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&PurchasedSecurity> for ActiveModel {
    fn from(security: &PurchasedSecurity) -> Self {
        Self {
            username: ActiveValue::Set(security.username.clone()),
            ticker: ActiveValue::Set(security.ticker.clone()),
            security_type: ActiveValue::Set(security.security_type.clone()),
            date: ActiveValue::Set(security.date),
            price: ActiveValue::Set(security.price),
            currency: ActiveValue::Set(security.currency.clone()),
        }
    }
}

impl From<Model> for PurchasedSecurity {
    fn from(model: Model) -> Self {
        Self {
            username: model.username,
            ticker: model.ticker,
            security_type: model.security_type,
            date: model.date,
            price: model.price,
            currency: model.currency,
        }
    }
}

//! Shopping receipts attached to card operations.
//!
//! The provider may list the same product line twice in one receipt. Lines
//! are identified by `(name, price)`; [`merge_items`] folds duplicates into
//! one line by summing quantity and sum.

use sea_orm::{ActiveValue, entity::prelude::*};
use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ShoppingReceiptItem {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub sum: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShoppingReceipt {
    pub operation_id: i64,
    pub total_sum: f64,
    pub operator: String,
    pub retail_place_address: String,
    pub items: Vec<ShoppingReceiptItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawReceipt {
    #[serde(default)]
    total_sum: f64,
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    retail_place_address: Option<String>,
    #[serde(default)]
    items: Vec<ShoppingReceiptItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawReceiptPayload {
    #[serde(default)]
    receipt: RawReceipt,
}

impl ShoppingReceipt {
    pub(crate) fn from_payload(operation_id: i64, payload: RawReceiptPayload) -> Self {
        let receipt = payload.receipt;
        Self {
            operation_id,
            total_sum: receipt.total_sum,
            operator: receipt.operator.unwrap_or_default(),
            retail_place_address: receipt.retail_place_address.unwrap_or_default(),
            items: merge_items(receipt.items),
        }
    }
}

/// One line per `(name, price)`, in order of first appearance.
pub fn merge_items(items: Vec<ShoppingReceiptItem>) -> Vec<ShoppingReceiptItem> {
    let mut merged: Vec<ShoppingReceiptItem> = Vec::with_capacity(items.len());
    for item in items {
        match merged
            .iter_mut()
            .find(|line| line.name == item.name && same_price(line.price, item.price))
        {
            Some(line) => {
                line.quantity += item.quantity;
                line.sum += item.sum;
            }
            None => merged.push(item),
        }
    }
    merged
}

/// `0.0` and `-0.0` are one price; NaN matches only NaN.
fn same_price(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "shopping_receipts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub operation_id: i64,
    pub total_sum: f64,
    pub operator: String,
    pub retail_place_address: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::receipt_items::Entity")]
    Items,
}

impl Related<super::receipt_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&ShoppingReceipt> for ActiveModel {
    fn from(receipt: &ShoppingReceipt) -> Self {
        Self {
            operation_id: ActiveValue::Set(receipt.operation_id),
            total_sum: ActiveValue::Set(receipt.total_sum),
            operator: ActiveValue::Set(receipt.operator.clone()),
            retail_place_address: ActiveValue::Set(receipt.retail_place_address.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(name: &str, price: f64, quantity: f64, sum: f64) -> ShoppingReceiptItem {
        ShoppingReceiptItem {
            name: name.to_string(),
            price,
            quantity,
            sum,
        }
    }

    #[test]
    fn duplicate_lines_are_merged() {
        let merged = merge_items(vec![
            item("A", 10.0, 1.0, 10.0),
            item("B", 5.0, 1.0, 5.0),
            item("A", 10.0, 2.0, 20.0),
        ]);

        assert_eq!(
            merged,
            vec![item("A", 10.0, 3.0, 30.0), item("B", 5.0, 1.0, 5.0)]
        );
    }

    #[test]
    fn same_name_different_price_stays_apart() {
        let merged = merge_items(vec![item("A", 10.0, 1.0, 10.0), item("A", 12.0, 1.0, 12.0)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn signed_zero_prices_are_one_line() {
        let merged = merge_items(vec![item("Bag", 0.0, 1.0, 0.0), item("Bag", -0.0, 1.0, 0.0)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].quantity, 2.0);
    }

    #[test]
    fn payload_is_normalized() {
        let payload: RawReceiptPayload = serde_json::from_value(json!({
            "receipt": {
                "totalSum": 40.0,
                "operator": "Cashier",
                "retailPlaceAddress": "Moscow",
                "items": [
                    {"name": "Milk", "price": 20.0, "quantity": 1.0, "sum": 20.0},
                    {"name": "Milk", "price": 20.0, "quantity": 1.0, "sum": 20.0}
                ]
            }
        }))
        .unwrap();

        let receipt = ShoppingReceipt::from_payload(77, payload);
        assert_eq!(receipt.operation_id, 77);
        assert_eq!(receipt.items, vec![item("Milk", 20.0, 2.0, 40.0)]);
    }
}

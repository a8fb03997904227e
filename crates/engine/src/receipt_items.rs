//! Stored receipt lines. `line` is the position after merging, so
//! `(operation_id, name, price)` stays unique.

use sea_orm::{ActiveValue, entity::prelude::*};

use crate::receipts::{ShoppingReceipt, ShoppingReceiptItem};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "shopping_receipt_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub operation_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub line: i32,
    pub name: String,
    pub price: f64,
    pub quantity: f64,
    pub sum: f64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::receipts::Entity",
        from = "Column::OperationId",
        to = "super::receipts::Column::OperationId",
        on_delete = "Cascade"
    )]
    Receipt,
}

impl Related<super::receipts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Receipt.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub(crate) fn active_models(receipt: &ShoppingReceipt) -> Vec<ActiveModel> {
    receipt
        .items
        .iter()
        .enumerate()
        .map(|(line, item)| ActiveModel {
            operation_id: ActiveValue::Set(receipt.operation_id),
            line: ActiveValue::Set(i32::try_from(line).unwrap_or(i32::MAX)),
            name: ActiveValue::Set(item.name.clone()),
            price: ActiveValue::Set(item.price),
            quantity: ActiveValue::Set(item.quantity),
            sum: ActiveValue::Set(item.sum),
        })
        .collect()
}

impl From<Model> for ShoppingReceiptItem {
    fn from(model: Model) -> Self {
        Self {
            name: model.name,
            price: model.price,
            quantity: model.quantity,
            sum: model.sum,
        }
    }
}

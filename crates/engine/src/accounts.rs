//! Bank accounts.

use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

/// Account types that belong to somebody else or live outside the bank.
const FOREIGN_TYPES: [&str; 3] = ["SharedCredit", "SharedCurrent", "ExternalAccount"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(rename = "accountType")]
    pub kind: String,
    #[serde(skip)]
    pub username: String,
}

impl Account {
    /// Shared and external accounts are never synced.
    pub fn is_foreign(&self) -> bool {
        FOREIGN_TYPES.contains(&self.kind.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub username: String,
    pub name: String,
    pub kind: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Account> for ActiveModel {
    fn from(account: &Account) -> Self {
        Self {
            id: ActiveValue::Set(account.id.clone()),
            username: ActiveValue::Set(account.username.clone()),
            name: ActiveValue::Set(account.name.clone()),
            kind: ActiveValue::Set(account.kind.clone()),
        }
    }
}

impl From<Model> for Account {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            kind: model.kind,
            username: model.username,
        }
    }
}

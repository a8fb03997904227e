//! Persistence port used by the sync chapters, and its sea-orm
//! implementation.
//!
//! Writes are idempotent upserts keyed by each record's identity, so a
//! window fetched twice leaves one row per record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::{Expr, OnConflict, Query},
};

use crate::{
    Account, Candle, Operation, PurchasedSecurity, ResultEngine, ShoppingReceipt,
    TradingOperation, TradingPosition, accounts, candles, operations, purchased_securities,
    receipt_items, receipts,
    trading_operations::{self, BUY, SELL},
};

/// Rows per `INSERT` statement; keeps SQLite under its bind limit.
const CHUNK: usize = 100;

/// Time-series records with a "latest stored" watermark.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    /// Tenant: account id.
    Operations,
    /// Tenant: username.
    TradingOperations,
    /// Tenant: ticker.
    Candles,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Batch {
    Accounts(Vec<Account>),
    Operations(Vec<Operation>),
    /// Remove pending operations of the account at or after `since`; the
    /// fresh copies are written by a following [`Batch::Operations`].
    DropPendingOperations {
        account_id: String,
        since: DateTime<Utc>,
    },
    ShoppingReceipt(ShoppingReceipt),
    TradingOperations(Vec<TradingOperation>),
    PurchasedSecurities(Vec<PurchasedSecurity>),
    Candles(Vec<Candle>),
}

impl Batch {
    /// Number of records the batch carries.
    pub fn len(&self) -> usize {
        match self {
            Self::Accounts(items) => items.len(),
            Self::Operations(items) => items.len(),
            Self::DropPendingOperations { .. } => 0,
            Self::ShoppingReceipt(_) => 1,
            Self::TradingOperations(items) => items.len(),
            Self::PurchasedSecurities(items) => items.len(),
            Self::Candles(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Time of the newest stored record of `kind` for `tenant`.
    async fn latest_time(
        &self,
        kind: RecordKind,
        tenant: &str,
    ) -> ResultEngine<Option<DateTime<Utc>>>;

    /// Where an operations refresh of `account_id` has to start from: the
    /// oldest pending operation if any, otherwise the newest operation.
    async fn operations_refresh_start(
        &self,
        account_id: &str,
    ) -> ResultEngine<Option<DateTime<Utc>>>;

    /// Write one batch. A batch touching several tables is all or nothing.
    async fn upsert(&self, batch: Batch) -> ResultEngine<usize>;

    /// Write all the batches or none of them.
    async fn transaction(&self, batches: Vec<Batch>) -> ResultEngine<usize>;

    /// Positions of `username` still open, or closed at or after `since`.
    async fn open_trading_positions(
        &self,
        since: DateTime<Utc>,
        username: &str,
    ) -> ResultEngine<Vec<TradingPosition>>;

    /// Debited operations flagged with a receipt that is not stored yet.
    async fn pending_receipt_operation_ids(&self, account_id: &str) -> ResultEngine<Vec<i64>>;

    async fn clear_receipt_flag(&self, operation_id: i64) -> ResultEngine<()>;
}

#[derive(Clone, Debug)]
pub struct SqlStorage {
    database: DatabaseConnection,
}

impl SqlStorage {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    pub async fn accounts(&self, username: &str) -> ResultEngine<Vec<Account>> {
        Ok(accounts::Entity::find()
            .filter(accounts::Column::Username.eq(username))
            .order_by_asc(accounts::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Account::from)
            .collect())
    }

    pub async fn operations(&self, account_id: &str) -> ResultEngine<Vec<Operation>> {
        Ok(operations::Entity::find()
            .filter(operations::Column::AccountId.eq(account_id))
            .order_by_asc(operations::Column::Id)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Operation::from)
            .collect())
    }

    pub async fn shopping_receipt(&self, operation_id: i64) -> ResultEngine<Option<ShoppingReceipt>> {
        let Some(receipt) = receipts::Entity::find_by_id(operation_id)
            .one(&self.database)
            .await?
        else {
            return Ok(None);
        };

        let items = receipt_items::Entity::find()
            .filter(receipt_items::Column::OperationId.eq(operation_id))
            .order_by_asc(receipt_items::Column::Line)
            .all(&self.database)
            .await?;

        Ok(Some(ShoppingReceipt {
            operation_id,
            total_sum: receipt.total_sum,
            operator: receipt.operator,
            retail_place_address: receipt.retail_place_address,
            items: items.into_iter().map(Into::into).collect(),
        }))
    }

    pub async fn candles(&self, ticker: &str) -> ResultEngine<Vec<Candle>> {
        Ok(candles::Entity::find()
            .filter(candles::Column::Ticker.eq(ticker))
            .order_by_asc(candles::Column::Time)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Candle::from)
            .collect())
    }

    pub async fn purchased_securities(&self, username: &str) -> ResultEngine<Vec<PurchasedSecurity>> {
        Ok(purchased_securities::Entity::find()
            .filter(purchased_securities::Column::Username.eq(username))
            .order_by_asc(purchased_securities::Column::Ticker)
            .all(&self.database)
            .await?
            .into_iter()
            .map(PurchasedSecurity::from)
            .collect())
    }
}

#[async_trait]
impl Storage for SqlStorage {
    async fn latest_time(
        &self,
        kind: RecordKind,
        tenant: &str,
    ) -> ResultEngine<Option<DateTime<Utc>>> {
        let db = &self.database;
        let latest = match kind {
            RecordKind::Operations => operations::Entity::find()
                .filter(operations::Column::AccountId.eq(tenant))
                .order_by_desc(operations::Column::Time)
                .one(db)
                .await?
                .map(|model| model.time),
            RecordKind::TradingOperations => trading_operations::Entity::find()
                .filter(trading_operations::Column::Username.eq(tenant))
                .order_by_desc(trading_operations::Column::Time)
                .one(db)
                .await?
                .map(|model| model.time),
            RecordKind::Candles => candles::Entity::find()
                .filter(candles::Column::Ticker.eq(tenant))
                .order_by_desc(candles::Column::Time)
                .one(db)
                .await?
                .map(|model| model.time),
        };
        Ok(latest)
    }

    async fn operations_refresh_start(
        &self,
        account_id: &str,
    ) -> ResultEngine<Option<DateTime<Utc>>> {
        let oldest_pending = operations::Entity::find()
            .filter(operations::Column::AccountId.eq(account_id))
            .filter(operations::Column::DebitingTime.is_null())
            .order_by_asc(operations::Column::Time)
            .one(&self.database)
            .await?;

        match oldest_pending {
            Some(model) => Ok(Some(model.time)),
            None => self.latest_time(RecordKind::Operations, account_id).await,
        }
    }

    async fn upsert(&self, batch: Batch) -> ResultEngine<usize> {
        self.transaction(vec![batch]).await
    }

    async fn transaction(&self, batches: Vec<Batch>) -> ResultEngine<usize> {
        let tx = self.database.begin().await?;
        let mut written = 0;
        for batch in batches {
            written += write(&tx, batch).await?;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn open_trading_positions(
        &self,
        since: DateTime<Utc>,
        username: &str,
    ) -> ResultEngine<Vec<TradingPosition>> {
        let operations: Vec<TradingOperation> = trading_operations::Entity::find()
            .filter(trading_operations::Column::Username.eq(username))
            .filter(trading_operations::Column::Kind.is_in([BUY, SELL]))
            .filter(trading_operations::Column::Ticker.is_not_null())
            .all(&self.database)
            .await?
            .into_iter()
            .map(TradingOperation::from)
            .collect();

        Ok(trading_operations::positions(&operations)
            .into_iter()
            .filter(|position| position.sell_time.is_none_or(|sold| sold >= since))
            .collect())
    }

    async fn pending_receipt_operation_ids(&self, account_id: &str) -> ResultEngine<Vec<i64>> {
        let stored = Query::select()
            .column(receipts::Column::OperationId)
            .from(receipts::Entity)
            .to_owned();

        Ok(operations::Entity::find()
            .select_only()
            .column(operations::Column::Id)
            .filter(operations::Column::AccountId.eq(account_id))
            .filter(operations::Column::HasShoppingReceipt.eq(true))
            .filter(operations::Column::DebitingTime.is_not_null())
            .filter(operations::Column::Id.not_in_subquery(stored))
            .order_by_asc(operations::Column::Id)
            .into_tuple::<i64>()
            .all(&self.database)
            .await?)
    }

    async fn clear_receipt_flag(&self, operation_id: i64) -> ResultEngine<()> {
        operations::Entity::update_many()
            .col_expr(operations::Column::HasShoppingReceipt, Expr::value(false))
            .filter(operations::Column::Id.eq(operation_id))
            .exec(&self.database)
            .await?;
        Ok(())
    }
}

async fn write<C: ConnectionTrait>(conn: &C, batch: Batch) -> ResultEngine<usize> {
    match batch {
        Batch::Accounts(items) => {
            upsert_all(
                conn,
                items.iter().map(accounts::ActiveModel::from).collect(),
                vec![accounts::Column::Id],
                vec![
                    accounts::Column::Username,
                    accounts::Column::Name,
                    accounts::Column::Kind,
                ],
            )
            .await
        }
        Batch::Operations(items) => {
            use operations::Column as Col;
            upsert_all(
                conn,
                items.iter().map(operations::ActiveModel::from).collect(),
                vec![Col::Id],
                vec![
                    Col::AccountId,
                    Col::Time,
                    Col::DebitingTime,
                    Col::Kind,
                    Col::Status,
                    Col::Description,
                    Col::Amount,
                    Col::Currency,
                    Col::Category,
                    Col::Mcc,
                    Col::HasShoppingReceipt,
                ],
            )
            .await
        }
        Batch::DropPendingOperations { account_id, since } => {
            let deleted = operations::Entity::delete_many()
                .filter(operations::Column::AccountId.eq(account_id))
                .filter(operations::Column::DebitingTime.is_null())
                .filter(operations::Column::Time.gte(since))
                .exec(conn)
                .await?;
            tracing::debug!("dropped {} pending operations", deleted.rows_affected);
            Ok(0)
        }
        Batch::ShoppingReceipt(receipt) => {
            use receipts::Column as Col;
            receipt_items::Entity::delete_many()
                .filter(receipt_items::Column::OperationId.eq(receipt.operation_id))
                .exec(conn)
                .await?;
            upsert_all(
                conn,
                vec![receipts::ActiveModel::from(&receipt)],
                vec![Col::OperationId],
                vec![Col::TotalSum, Col::Operator, Col::RetailPlaceAddress],
            )
            .await?;
            let items = receipt_items::active_models(&receipt);
            if !items.is_empty() {
                receipt_items::Entity::insert_many(items)
                    .exec_without_returning(conn)
                    .await?;
            }
            Ok(1)
        }
        Batch::TradingOperations(items) => {
            use trading_operations::Column as Col;
            upsert_all(
                conn,
                items
                    .iter()
                    .map(trading_operations::ActiveModel::from)
                    .collect(),
                vec![Col::Id],
                vec![
                    Col::Username,
                    Col::Time,
                    Col::Kind,
                    Col::Ticker,
                    Col::InstrumentType,
                    Col::Price,
                    Col::Quantity,
                    Col::Payment,
                    Col::Commission,
                    Col::Currency,
                    Col::Description,
                ],
            )
            .await
        }
        Batch::PurchasedSecurities(items) => {
            use purchased_securities::Column as Col;
            upsert_all(
                conn,
                items
                    .iter()
                    .map(purchased_securities::ActiveModel::from)
                    .collect(),
                vec![Col::Username, Col::Ticker, Col::SecurityType, Col::Date],
                vec![Col::Price, Col::Currency],
            )
            .await
        }
        Batch::Candles(items) => {
            use candles::Column as Col;
            upsert_all(
                conn,
                items.iter().map(candles::ActiveModel::from).collect(),
                vec![Col::Ticker, Col::Time],
                vec![Col::Open, Col::Close, Col::High, Col::Low, Col::Volume],
            )
            .await
        }
    }
}

async fn upsert_all<A, C>(
    conn: &C,
    models: Vec<A>,
    keys: Vec<<A::Entity as EntityTrait>::Column>,
    updates: Vec<<A::Entity as EntityTrait>::Column>,
) -> ResultEngine<usize>
where
    A: ActiveModelTrait + Send,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
    C: ConnectionTrait,
{
    let written = models.len();
    let mut models = models.into_iter().peekable();
    while models.peek().is_some() {
        let chunk: Vec<A> = models.by_ref().take(CHUNK).collect();
        <A::Entity as EntityTrait>::insert_many(chunk)
            .on_conflict(
                OnConflict::columns(keys.clone())
                    .update_columns(updates.clone())
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    Ok(written)
}

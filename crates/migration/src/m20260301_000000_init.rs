//! Initial schema migration - creates all tables from scratch.
//!
//! - `accounts`: bank accounts of each user
//! - `operations`: account operations, pending ones included
//! - `shopping_receipts` / `shopping_receipt_items`: receipts of operations
//! - `trading_operations`: brokerage operations
//! - `purchased_securities`: daily portfolio snapshots
//! - `candles`: daily price candles per ticker

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Accounts {
    Table,
    Id,
    Username,
    Name,
    Kind,
}

#[derive(Iden)]
enum Operations {
    Table,
    Id,
    AccountId,
    Time,
    DebitingTime,
    Kind,
    Status,
    Description,
    Amount,
    Currency,
    Category,
    Mcc,
    HasShoppingReceipt,
}

#[derive(Iden)]
enum ShoppingReceipts {
    Table,
    OperationId,
    TotalSum,
    Operator,
    RetailPlaceAddress,
}

#[derive(Iden)]
enum ShoppingReceiptItems {
    Table,
    OperationId,
    Line,
    Name,
    Price,
    Quantity,
    Sum,
}

#[derive(Iden)]
enum TradingOperations {
    Table,
    Id,
    Username,
    Time,
    Kind,
    Ticker,
    InstrumentType,
    Price,
    Quantity,
    Payment,
    Commission,
    Currency,
    Description,
}

#[derive(Iden)]
enum PurchasedSecurities {
    Table,
    Username,
    Ticker,
    SecurityType,
    Date,
    Price,
    Currency,
}

#[derive(Iden)]
enum Candles {
    Table,
    Ticker,
    Time,
    Open,
    Close,
    High,
    Low,
    Volume,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Accounts
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Accounts::Username).string().not_null())
                    .col(ColumnDef::new(Accounts::Name).string().not_null())
                    .col(ColumnDef::new(Accounts::Kind).string().not_null())
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Operations
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Operations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Operations::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Operations::AccountId).string().not_null())
                    .col(ColumnDef::new(Operations::Time).timestamp().not_null())
                    .col(ColumnDef::new(Operations::DebitingTime).timestamp())
                    .col(ColumnDef::new(Operations::Kind).string().not_null())
                    .col(ColumnDef::new(Operations::Status).string().not_null())
                    .col(ColumnDef::new(Operations::Description).string().not_null())
                    .col(ColumnDef::new(Operations::Amount).double().not_null())
                    .col(ColumnDef::new(Operations::Currency).string().not_null())
                    .col(ColumnDef::new(Operations::Category).string())
                    .col(ColumnDef::new(Operations::Mcc).string())
                    .col(
                        ColumnDef::new(Operations::HasShoppingReceipt)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-operations-account_id")
                            .from(Operations::Table, Operations::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-operations-account_id-time")
                    .table(Operations::Table)
                    .col(Operations::AccountId)
                    .col(Operations::Time)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Shopping receipts
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(ShoppingReceipts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ShoppingReceipts::OperationId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ShoppingReceipts::TotalSum).double().not_null())
                    .col(ColumnDef::new(ShoppingReceipts::Operator).string().not_null())
                    .col(
                        ColumnDef::new(ShoppingReceipts::RetailPlaceAddress)
                            .string()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-shopping_receipts-operation_id")
                            .from(ShoppingReceipts::Table, ShoppingReceipts::OperationId)
                            .to(Operations::Table, Operations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ShoppingReceiptItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ShoppingReceiptItems::OperationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ShoppingReceiptItems::Line).integer().not_null())
                    .col(ColumnDef::new(ShoppingReceiptItems::Name).string().not_null())
                    .col(ColumnDef::new(ShoppingReceiptItems::Price).double().not_null())
                    .col(
                        ColumnDef::new(ShoppingReceiptItems::Quantity)
                            .double()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ShoppingReceiptItems::Sum).double().not_null())
                    .primary_key(
                        Index::create()
                            .col(ShoppingReceiptItems::OperationId)
                            .col(ShoppingReceiptItems::Line),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-shopping_receipt_items-operation_id")
                            .from(
                                ShoppingReceiptItems::Table,
                                ShoppingReceiptItems::OperationId,
                            )
                            .to(ShoppingReceipts::Table, ShoppingReceipts::OperationId)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-shopping_receipt_items-operation_id-name-price-unique")
                    .table(ShoppingReceiptItems::Table)
                    .col(ShoppingReceiptItems::OperationId)
                    .col(ShoppingReceiptItems::Name)
                    .col(ShoppingReceiptItems::Price)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Trading operations
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(TradingOperations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TradingOperations::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TradingOperations::Username).string().not_null())
                    .col(ColumnDef::new(TradingOperations::Time).timestamp().not_null())
                    .col(ColumnDef::new(TradingOperations::Kind).string().not_null())
                    .col(ColumnDef::new(TradingOperations::Ticker).string())
                    .col(ColumnDef::new(TradingOperations::InstrumentType).string())
                    .col(ColumnDef::new(TradingOperations::Price).double())
                    .col(ColumnDef::new(TradingOperations::Quantity).big_integer())
                    .col(ColumnDef::new(TradingOperations::Payment).double().not_null())
                    .col(ColumnDef::new(TradingOperations::Commission).double())
                    .col(ColumnDef::new(TradingOperations::Currency).string().not_null())
                    .col(
                        ColumnDef::new(TradingOperations::Description)
                            .string()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-trading_operations-username-time")
                    .table(TradingOperations::Table)
                    .col(TradingOperations::Username)
                    .col(TradingOperations::Time)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 5. Purchased securities
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(PurchasedSecurities::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PurchasedSecurities::Username).string().not_null())
                    .col(ColumnDef::new(PurchasedSecurities::Ticker).string().not_null())
                    .col(
                        ColumnDef::new(PurchasedSecurities::SecurityType)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PurchasedSecurities::Date).date().not_null())
                    .col(ColumnDef::new(PurchasedSecurities::Price).double().not_null())
                    .col(ColumnDef::new(PurchasedSecurities::Currency).string().not_null())
                    .primary_key(
                        Index::create()
                            .col(PurchasedSecurities::Username)
                            .col(PurchasedSecurities::Ticker)
                            .col(PurchasedSecurities::SecurityType)
                            .col(PurchasedSecurities::Date),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 6. Candles
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Candles::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Candles::Ticker).string().not_null())
                    .col(ColumnDef::new(Candles::Time).timestamp().not_null())
                    .col(ColumnDef::new(Candles::Open).double().not_null())
                    .col(ColumnDef::new(Candles::Close).double().not_null())
                    .col(ColumnDef::new(Candles::High).double().not_null())
                    .col(ColumnDef::new(Candles::Low).double().not_null())
                    .col(ColumnDef::new(Candles::Volume).double().not_null())
                    .primary_key(Index::create().col(Candles::Ticker).col(Candles::Time))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Candles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PurchasedSecurities::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TradingOperations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ShoppingReceiptItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ShoppingReceipts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Operations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        Ok(())
    }
}

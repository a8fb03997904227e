//! Incremental sync of bank and brokerage records.
//!
//! The [`Client`] talks to the bank web API and keeps its session alive,
//! the [`Synchronizer`] walks the [`chapters`] tree and persists everything
//! through a [`Storage`], returning a [`Report`].

pub use accounts::Account;
pub use candles::{Candle, candle_windows};
pub use chapters::{Canvas, Chapter, ChapterKey, Synced};
pub use client::{CallContext, Client, ClientBuilder};
pub use credentials::{Credential, CredentialStore};
pub use error::EngineError;
pub use operations::Operation;
pub use provider::ProviderConfig;
pub use purchased_securities::PurchasedSecurity;
pub use receipts::{ShoppingReceipt, ShoppingReceiptItem, merge_items};
pub use report::{Report, ReportEntry};
pub use session::{Confirm, SessionState};
pub use storage::{Batch, RecordKind, SqlStorage, Storage};
pub use sync::{SyncOptions, Synchronizer, walk};
pub use trading_operations::{TradingOperation, TradingPosition};
pub use util::{start_of_day, trading_floor, window_start};

pub mod chapters;
pub mod provider;

mod accounts;
mod candles;
mod client;
mod credentials;
mod error;
mod operations;
mod purchased_securities;
mod receipt_items;
mod receipts;
mod report;
mod session;
mod storage;
mod sync;
mod trading_operations;
mod util;

pub type ResultEngine<T> = Result<T, EngineError>;

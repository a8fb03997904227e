//! Units of sync work.
//!
//! A [`Chapter`] pulls one kind of record for one tenant, stores it and may
//! hand back child chapters discovered on the way (one operations chapter
//! per account, one candles chapter per open position, ...).

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::{CallContext, Client, EngineError, ResultEngine, Storage};

pub use bank::{AccountsChapter, OperationsChapter, ReceiptsChapter};
pub use trading::{
    CandlesChapter, PurchasedSecuritiesChapter, TickerCandlesChapter, TradingOperationsChapter,
};

mod bank;
mod trading;

/// What every chapter sees while syncing.
pub struct Canvas<'a> {
    pub client: &'a Client,
    pub storage: &'a dyn Storage,
    pub ctx: &'a CallContext,
    pub now: DateTime<Utc>,
}

pub struct Synced {
    pub children: Vec<Box<dyn Chapter>>,
    pub count: usize,
}

impl Synced {
    pub fn count(count: usize) -> Self {
        Self {
            children: Vec::new(),
            count,
        }
    }

    pub fn with_children(children: Vec<Box<dyn Chapter>>, count: usize) -> Self {
        Self { children, count }
    }
}

#[async_trait]
pub trait Chapter: Send + Sync {
    fn title(&self) -> String;

    /// `overlap` is how far before the last stored record the window opens.
    async fn sync(&self, canvas: &Canvas<'_>, overlap: Duration) -> ResultEngine<Synced>;
}

/// Root chapters that can be switched on and off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterKey {
    Accounts,
    TradingOperations,
}

impl ChapterKey {
    pub const ALL: [ChapterKey; 2] = [ChapterKey::Accounts, ChapterKey::TradingOperations];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::TradingOperations => "trading_operations",
        }
    }
}

impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChapterKey {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "accounts" => Ok(Self::Accounts),
            "trading_operations" => Ok(Self::TradingOperations),
            other => Err(EngineError::InvalidRequest(format!(
                "unknown chapter: {other}"
            ))),
        }
    }
}

/// Root chapters in the order they are walked.
pub fn roots(enabled: &[ChapterKey], receipts: bool) -> Vec<Box<dyn Chapter>> {
    ChapterKey::ALL
        .into_iter()
        .filter(|key| enabled.contains(key))
        .map(|key| -> Box<dyn Chapter> {
            match key {
                ChapterKey::Accounts => Box::new(AccountsChapter::new(receipts)),
                ChapterKey::TradingOperations => Box::new(TradingOperationsChapter),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_follow_enabled_keys() {
        let titles: Vec<_> = roots(&ChapterKey::ALL, true)
            .iter()
            .map(|c| c.title())
            .collect();
        assert_eq!(titles, ["Accounts", "Trading operations"]);

        let titles: Vec<_> = roots(&[ChapterKey::TradingOperations], false)
            .iter()
            .map(|c| c.title())
            .collect();
        assert_eq!(titles, ["Trading operations"]);
    }

    #[test]
    fn keys_parse() {
        assert_eq!(
            "trading_operations".parse::<ChapterKey>().unwrap(),
            ChapterKey::TradingOperations
        );
        assert!("candles".parse::<ChapterKey>().is_err());
    }
}

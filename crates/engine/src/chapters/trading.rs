use async_trait::async_trait;
use chrono::Duration;

use crate::{
    ResultEngine, TradingPosition,
    candles::DAY_RESOLUTION,
    chapters::{Canvas, Chapter, Synced},
    storage::{Batch, RecordKind},
    util::{start_of_day, trading_floor, window_start},
};

pub struct TradingOperationsChapter;

#[async_trait]
impl Chapter for TradingOperationsChapter {
    fn title(&self) -> String {
        "Trading operations".to_string()
    }

    async fn sync(&self, canvas: &Canvas<'_>, overlap: Duration) -> ResultEngine<Synced> {
        let username = canvas.client.username();
        let latest = canvas
            .storage
            .latest_time(RecordKind::TradingOperations, username)
            .await?;
        let since = window_start(latest, overlap, trading_floor());

        let operations = canvas
            .client
            .trading_operations(canvas.ctx, since, canvas.now)
            .await?;
        let count = canvas
            .storage
            .upsert(Batch::TradingOperations(operations))
            .await?;

        Ok(Synced::with_children(
            vec![Box::new(PurchasedSecuritiesChapter), Box::new(CandlesChapter)],
            count,
        ))
    }
}

pub struct PurchasedSecuritiesChapter;

#[async_trait]
impl Chapter for PurchasedSecuritiesChapter {
    fn title(&self) -> String {
        "Purchased securities".to_string()
    }

    async fn sync(&self, canvas: &Canvas<'_>, _overlap: Duration) -> ResultEngine<Synced> {
        let securities = canvas
            .client
            .purchased_securities(canvas.ctx, canvas.now)
            .await?;
        let count = canvas
            .storage
            .upsert(Batch::PurchasedSecurities(securities))
            .await?;
        Ok(Synced::count(count))
    }
}

/// Fans out into one [`TickerCandlesChapter`] per position open within the
/// overlap.
pub struct CandlesChapter;

#[async_trait]
impl Chapter for CandlesChapter {
    fn title(&self) -> String {
        "Candles".to_string()
    }

    async fn sync(&self, canvas: &Canvas<'_>, overlap: Duration) -> ResultEngine<Synced> {
        let since = canvas.now - overlap;
        let positions = canvas
            .storage
            .open_trading_positions(since, canvas.client.username())
            .await?;

        let count = positions.len();
        let children = positions
            .into_iter()
            .map(|position| Box::new(TickerCandlesChapter::new(position)) as Box<dyn Chapter>)
            .collect();
        Ok(Synced::with_children(children, count))
    }
}

pub struct TickerCandlesChapter {
    position: TradingPosition,
}

impl TickerCandlesChapter {
    pub fn new(position: TradingPosition) -> Self {
        Self { position }
    }
}

#[async_trait]
impl Chapter for TickerCandlesChapter {
    fn title(&self) -> String {
        self.position.ticker.clone()
    }

    async fn sync(&self, canvas: &Canvas<'_>, overlap: Duration) -> ResultEngine<Synced> {
        let ticker = self.position.ticker.as_str();
        let latest = canvas
            .storage
            .latest_time(RecordKind::Candles, ticker)
            .await?;

        let start = window_start(latest, overlap, start_of_day(self.position.buy_time));
        let end = self
            .position
            .sell_time
            .map(start_of_day)
            .unwrap_or(canvas.now);
        if start >= end {
            return Ok(Synced::count(0));
        }

        let candles = canvas
            .client
            .candles(canvas.ctx, ticker, DAY_RESOLUTION, start, end)
            .await?;
        let count = canvas.storage.upsert(Batch::Candles(candles)).await?;
        Ok(Synced::count(count))
    }
}

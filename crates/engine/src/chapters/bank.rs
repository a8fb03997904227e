use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration};

use crate::{
    Account, EngineError, ResultEngine,
    chapters::{Canvas, Chapter, Synced},
    storage::Batch,
    util::window_start,
};

pub struct AccountsChapter {
    receipts: bool,
}

impl AccountsChapter {
    pub fn new(receipts: bool) -> Self {
        Self { receipts }
    }
}

#[async_trait]
impl Chapter for AccountsChapter {
    fn title(&self) -> String {
        "Accounts".to_string()
    }

    async fn sync(&self, canvas: &Canvas<'_>, _overlap: Duration) -> ResultEngine<Synced> {
        let accounts = canvas.client.accounts(canvas.ctx).await?;
        if accounts.is_empty() {
            return Ok(Synced::count(0));
        }

        let count = canvas
            .storage
            .upsert(Batch::Accounts(accounts.clone()))
            .await?;

        let mut children: Vec<Box<dyn Chapter>> = accounts
            .iter()
            .cloned()
            .map(|account| Box::new(OperationsChapter::new(account)) as Box<dyn Chapter>)
            .collect();

        if self.receipts {
            let suspended = Arc::new(AtomicBool::new(false));
            children.extend(accounts.into_iter().map(|account| {
                Box::new(ReceiptsChapter::new(account, suspended.clone())) as Box<dyn Chapter>
            }));
        }

        Ok(Synced::with_children(children, count))
    }
}

pub struct OperationsChapter {
    account: Account,
}

impl OperationsChapter {
    pub fn new(account: Account) -> Self {
        Self { account }
    }
}

#[async_trait]
impl Chapter for OperationsChapter {
    fn title(&self) -> String {
        self.account.name.clone()
    }

    async fn sync(&self, canvas: &Canvas<'_>, overlap: Duration) -> ResultEngine<Synced> {
        let account_id = self.account.id.as_str();
        let latest = canvas.storage.operations_refresh_start(account_id).await?;
        let since = window_start(latest, overlap, DateTime::UNIX_EPOCH);

        let operations = canvas
            .client
            .operations(canvas.ctx, account_id, since, canvas.now)
            .await?;
        let count = operations.len();

        canvas
            .storage
            .transaction(vec![
                Batch::DropPendingOperations {
                    account_id: account_id.to_string(),
                    since,
                },
                Batch::Operations(operations),
            ])
            .await?;

        Ok(Synced::count(count))
    }
}

/// Receipts of one account. Every receipts chapter of a run shares
/// `suspended`: once the provider starts throttling, the remaining ones
/// fail fast instead of waiting on it.
pub struct ReceiptsChapter {
    account: Account,
    suspended: Arc<AtomicBool>,
}

impl ReceiptsChapter {
    pub fn new(account: Account, suspended: Arc<AtomicBool>) -> Self {
        Self { account, suspended }
    }
}

#[async_trait]
impl Chapter for ReceiptsChapter {
    fn title(&self) -> String {
        format!("{} receipts", self.account.name)
    }

    async fn sync(&self, canvas: &Canvas<'_>, _overlap: Duration) -> ResultEngine<Synced> {
        if self.suspended.load(Ordering::SeqCst) {
            return Err(EngineError::Suspended);
        }

        let pending = canvas
            .storage
            .pending_receipt_operation_ids(&self.account.id)
            .await?;

        let mut count = 0;
        for operation_id in pending {
            if canvas.ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            match canvas.client.shopping_receipt(canvas.ctx, operation_id).await {
                Ok(Some(receipt)) => {
                    canvas.storage.upsert(Batch::ShoppingReceipt(receipt)).await?;
                    count += 1;
                }
                Ok(None) => canvas.storage.clear_receipt_flag(operation_id).await?,
                Err(err) if err.suspends_receipts() => {
                    self.suspended.store(true, Ordering::SeqCst);
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!("skipping receipt of operation #{operation_id}: {err}");
                }
            }
        }

        Ok(Synced::count(count))
    }
}

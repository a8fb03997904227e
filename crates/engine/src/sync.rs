//! Depth-first walk over the chapter tree.
//!
//! A chapter runs, then its children, then its later siblings. A failing
//! chapter is reported and the walk goes on; cancellation stops it and no
//! report is produced.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    CallContext, Client, EngineError, ResultEngine, Storage,
    chapters::{self, Canvas, Chapter, ChapterKey},
    report::{self, Report, ReportEntry},
};

#[derive(Clone, Debug)]
pub struct SyncOptions {
    pub chapters: Vec<ChapterKey>,
    pub receipts: bool,
    pub overlap: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            chapters: ChapterKey::ALL.to_vec(),
            receipts: true,
            overlap: Duration::hours(168),
        }
    }
}

#[derive(Clone)]
pub struct Synchronizer {
    storage: Arc<dyn Storage>,
    options: SyncOptions,
}

impl Synchronizer {
    pub fn new(storage: Arc<dyn Storage>, options: SyncOptions) -> Self {
        Self { storage, options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run the enabled chapters for the owner of `client`. `overlap`
    /// overrides the configured one for this run only.
    pub async fn sync(
        &self,
        client: &Client,
        cancel: CancellationToken,
        overlap: Option<Duration>,
    ) -> ResultEngine<Report> {
        let ctx = CallContext::new(cancel);
        let canvas = Canvas {
            client,
            storage: self.storage.as_ref(),
            ctx: &ctx,
            now: Utc::now(),
        };
        let roots = chapters::roots(&self.options.chapters, self.options.receipts);

        tracing::info!("sync started for {}", client.username());
        walk(&canvas, roots, overlap.unwrap_or(self.options.overlap)).await
    }
}

pub async fn walk(
    canvas: &Canvas<'_>,
    roots: Vec<Box<dyn Chapter>>,
    overlap: Duration,
) -> ResultEngine<Report> {
    let (entries, writer) = report::spawn_writer();
    let mut stack: Vec<Box<dyn Chapter>> = roots.into_iter().rev().collect();

    while let Some(chapter) = stack.pop() {
        if canvas.ctx.is_cancelled() {
            writer.abort();
            return Err(EngineError::Cancelled);
        }

        let title = chapter.title();
        let entry = match chapter.sync(canvas, overlap).await {
            Ok(synced) => {
                tracing::info!("{title}: {} items synced", synced.count);
                stack.extend(synced.children.into_iter().rev());
                ReportEntry::synced(title, synced.count)
            }
            Err(err) if err.is_cancellation() => {
                tracing::info!("{title}: sync canceled");
                writer.abort();
                return Err(err);
            }
            Err(err) => {
                tracing::warn!("{title}: {err}");
                ReportEntry::failed(title, &err)
            }
        };

        if entries.send(entry).is_err() {
            return Err(EngineError::Task("report writer stopped".to_string()));
        }
    }

    drop(entries);
    writer
        .await
        .map_err(|err| EngineError::Task(format!("report writer: {err}")))
}

//! Plain text summary of a sync run.
//!
//! Chapters report their outcome over a channel to a single writer task;
//! the finished [`Report`] is handed back once the walk is over.

use std::fmt;

use tokio::{sync::mpsc, task::JoinHandle};

use crate::EngineError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportEntry {
    pub title: String,
    pub outcome: Result<usize, String>,
}

impl ReportEntry {
    pub fn synced(title: impl Into<String>, count: usize) -> Self {
        Self {
            title: title.into(),
            outcome: Ok(count),
        }
    }

    pub fn failed(title: impl Into<String>, err: &EngineError) -> Self {
        Self {
            title: title.into(),
            outcome: Err(err.to_string()),
        }
    }
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(count) => write!(f, "✅ {}: {count} items synced", self.title),
            Err(err) => write!(f, "❌ {}: {err}", self.title),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    entries: Vec<ReportEntry>,
}

impl Report {
    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.is_err())
            .count()
    }

    pub fn entry(&self, title: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|entry| entry.title == title)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "Nothing to sync");
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Spawn the task collecting entries until every sender is dropped.
pub(crate) fn spawn_writer() -> (mpsc::UnboundedSender<ReportEntry>, JoinHandle<Report>) {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let writer = tokio::spawn(async move {
        let mut report = Report::default();
        while let Some(entry) = receiver.recv().await {
            report.push(entry);
        }
        report
    });
    (sender, writer)
}

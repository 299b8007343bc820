use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{HistorySource, Item};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
/// Why paging ended.
pub enum StopReason {
    /// The source returned an empty page.
    EndOfHistory,
    /// Everything older than the current position was processed by an earlier run.
    CaughtUp,
    /// A fetch failed (or the cursor stopped advancing) before history was exhausted.
    SourceFailed,
    /// The run was cancelled between pages.
    Cancelled,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndOfHistory => "end_of_history",
            Self::CaughtUp => "caught_up",
            Self::SourceFailed => "source_failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// True when paging saw every item newer than the cutoff.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::EndOfHistory | Self::CaughtUp)
    }
}

#[derive(Debug, Clone, Default)]
/// Cooperative cancellation shared between a run and whoever may abort it.
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Items strictly newer than the cutoff, still newest first.
    pub items: Vec<Item>,
    pub raw_len: usize,
}

/// Walks a stream from newest to oldest, applying the resume cutoff.
///
/// The cursor is always the last item of the raw page, so progress is made even when a
/// whole page is filtered out.
pub struct Paginator<'a> {
    source: &'a dyn HistorySource,
    stream_id: &'a str,
    cutoff: Option<DateTime<Utc>>,
    page_size: usize,
    cancel: CancelFlag,
    cursor: Option<Item>,
    stop_reason: Option<StopReason>,
    pages_fetched: usize,
    items_fetched: usize,
}

impl<'a> Paginator<'a> {
    pub fn new(
        source: &'a dyn HistorySource,
        stream_id: &'a str,
        cutoff: Option<DateTime<Utc>>,
        page_size: usize,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            source,
            stream_id,
            cutoff,
            page_size: page_size.max(1),
            cancel,
            cursor: None,
            stop_reason: None,
            pages_fetched: 0,
            items_fetched: 0,
        }
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn items_fetched(&self) -> usize {
        self.items_fetched
    }

    /// Returns the next filtered page, or `None` once a stop condition was reached.
    pub async fn next_page(&mut self) -> Option<FetchedPage> {
        if self.stop_reason.is_some() {
            return None;
        }
        if self.cancel.is_cancelled() {
            return self.stop(StopReason::Cancelled);
        }

        let fetched = match &self.cursor {
            None => {
                self.source
                    .fetch_newest(self.stream_id, self.page_size)
                    .await
            }
            Some(cursor) => {
                self.source
                    .fetch_before(self.stream_id, cursor, self.page_size)
                    .await
            }
        };
        let raw = match fetched {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(
                    stream_id = %self.stream_id,
                    pages_fetched = self.pages_fetched,
                    error = %error,
                    "history fetch failed; stopping run"
                );
                return self.stop(StopReason::SourceFailed);
            }
        };

        self.pages_fetched = self.pages_fetched.saturating_add(1);
        self.items_fetched = self.items_fetched.saturating_add(raw.len());
        let Some(oldest) = raw.last().cloned() else {
            return self.stop(StopReason::EndOfHistory);
        };
        if self
            .cursor
            .as_ref()
            .is_some_and(|cursor| cursor.id == oldest.id)
        {
            tracing::warn!(
                stream_id = %self.stream_id,
                cursor = %oldest.id,
                "history cursor did not advance; stopping run"
            );
            return self.stop(StopReason::SourceFailed);
        }

        let raw_len = raw.len();
        let items = match self.cutoff {
            Some(cutoff) => raw
                .into_iter()
                .filter(|item| item.created_at > cutoff)
                .collect::<Vec<_>>(),
            None => raw,
        };
        tracing::debug!(
            stream_id = %self.stream_id,
            raw_len,
            filtered_len = items.len(),
            oldest_id = %oldest.id,
            "fetched history page"
        );

        if let Some(cutoff) = self.cutoff {
            if items.is_empty() {
                return self.stop(StopReason::CaughtUp);
            }
            if oldest.created_at <= cutoff {
                self.stop_reason = Some(StopReason::CaughtUp);
            }
        }
        self.cursor = Some(oldest);
        Some(FetchedPage { items, raw_len })
    }

    fn stop(&mut self, reason: StopReason) -> Option<FetchedPage> {
        self.stop_reason = Some(reason);
        None
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{StreamError, StreamResult};
use crate::stream::backend::{ChangeFeed, ChangeStreamBackend};
use crate::stream::record::{ChangeRecord, StreamSpec};

struct FeedSender {
    spec: StreamSpec,
    tx: mpsc::UnboundedSender<StreamResult<ChangeRecord>>,
}

/// In-process change stream. Records pushed with [`emit`](Self::emit) fan
/// out to every live subscription whose spec accepts them.
#[derive(Clone, Default)]
pub struct InMemoryChangeStream {
    feeds: Arc<Mutex<Vec<FeedSender>>>,
    failing_opens: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
}

impl InMemoryChangeStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many subscriptions received the record.
    pub fn emit(&self, record: ChangeRecord) -> usize {
        self.fan_out(record, true)
    }

    /// Sends the record to every subscription on the same table and event
    /// kind, ignoring scope filters, like a backend with a broken filter.
    pub fn emit_unfiltered(&self, record: ChangeRecord) -> usize {
        self.fan_out(record, false)
    }

    /// Ends every live feed, as a transport disconnect would.
    pub fn disconnect_all(&self) {
        if let Ok(mut feeds) = self.feeds.lock() {
            feeds.clear();
        }
    }

    /// Pushes a transport error into every live feed.
    pub fn fail_all(&self, reason: &str) {
        if let Ok(mut feeds) = self.feeds.lock() {
            for feed in feeds.drain(..) {
                let _ = feed
                    .tx
                    .send(Err(StreamError::Transport(reason.to_string())));
            }
        }
    }

    /// Makes the next `count` subscribe calls fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.feeds
            .lock()
            .map(|mut feeds| {
                feeds.retain(|feed| !feed.tx.is_closed());
                feeds.len()
            })
            .unwrap_or_default()
    }

    fn fan_out(&self, record: ChangeRecord, honor_filter: bool) -> usize {
        let Ok(mut feeds) = self.feeds.lock() else {
            return 0;
        };
        feeds.retain(|feed| !feed.tx.is_closed());
        let mut delivered = 0;
        for feed in feeds.iter() {
            let accepted = if honor_filter {
                feed.spec.accepts(&record)
            } else {
                feed.spec.table == record.table && feed.spec.event_kind == record.event_kind
            };
            if accepted && feed.tx.send(Ok(record.clone())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl ChangeStreamBackend for InMemoryChangeStream {
    fn backend_id(&self) -> &str {
        "memory"
    }

    async fn subscribe(&self, spec: &StreamSpec) -> StreamResult<ChangeFeed> {
        let failed = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failed {
            return Err(StreamError::OpenFailed("backend unavailable".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .map_err(|_| StreamError::OpenFailed("feed registry poisoned".to_string()))?
            .push(FeedSender {
                spec: spec.clone(),
                tx,
            });
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

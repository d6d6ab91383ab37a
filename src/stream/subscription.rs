use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::Duration;

use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::stream::backend::ChangeStreamBackend;
use crate::stream::record::{ChangeRecord, StreamSpec};

pub type RecordCallback = Arc<dyn Fn(ChangeRecord) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: usize },
    Degraded,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: usize,
    pub degraded_probe: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for ReconnectPolicy {
    fn from(config: &StreamConfig) -> Self {
        Self {
            base_backoff: config.base_backoff(),
            max_backoff: config.max_backoff(),
            max_attempts: config.max_reconnect_attempts(),
            degraded_probe: config.degraded_probe_interval(),
        }
    }
}

pub fn compute_backoff(attempt: usize, policy: &ReconnectPolicy) -> Duration {
    let exp = attempt.saturating_sub(1) as u32;
    let multiplier = 1u64.checked_shl(exp.min(10)).unwrap_or(u64::MAX);
    let base = policy.base_backoff.as_millis() as u64;
    let backoff = base.saturating_mul(multiplier);
    let max = policy.max_backoff.as_millis() as u64;
    Duration::from_millis(std::cmp::min(backoff, max))
}

/// Serializes record delivery against `close`.
///
/// Once `close` returns the callback is never invoked again. A close issued
/// from inside the callback itself only flips the flag, since the lock is
/// already held by that same delivery.
struct DeliveryGate {
    closed: AtomicBool,
    callback: Mutex<Option<RecordCallback>>,
    delivering_on: Mutex<Option<ThreadId>>,
}

impl DeliveryGate {
    fn new(callback: RecordCallback) -> Self {
        Self {
            closed: AtomicBool::new(false),
            callback: Mutex::new(Some(callback)),
            delivering_on: Mutex::new(None),
        }
    }

    fn deliver(&self, record: ChangeRecord) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let guard = relock(&self.callback);
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let Some(callback) = guard.as_ref() else {
            return false;
        };
        *relock(&self.delivering_on) = Some(std::thread::current().id());
        callback(record);
        *relock(&self.delivering_on) = None;
        true
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if *relock(&self.delivering_on) == Some(std::thread::current().id()) {
            return true;
        }
        relock(&self.callback).take();
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Opens change-stream subscriptions against one backend.
#[derive(Clone)]
pub struct ChangeStreamSubscriber {
    backend: Arc<dyn ChangeStreamBackend>,
    policy: ReconnectPolicy,
}

impl ChangeStreamSubscriber {
    pub fn new(backend: Arc<dyn ChangeStreamBackend>, policy: ReconnectPolicy) -> Self {
        Self { backend, policy }
    }

    /// Starts delivering records matching `spec` to `on_event`, in arrival
    /// order. Must be called from within a tokio runtime.
    pub fn open<F>(&self, spec: StreamSpec, on_event: F) -> SubscriptionHandle
    where
        F: Fn(ChangeRecord) + Send + Sync + 'static,
    {
        let id = uuid::Uuid::new_v4().to_string();
        let gate = Arc::new(DeliveryGate::new(Arc::new(on_event)));
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Connecting);
        let worker = SubscriptionWorker {
            id: id.clone(),
            backend: Arc::clone(&self.backend),
            spec: spec.clone(),
            policy: self.policy.clone(),
            gate: Arc::clone(&gate),
            cancel: cancel.clone(),
            status: status_tx,
        };
        tokio::spawn(worker.run());
        SubscriptionHandle {
            id,
            spec,
            gate,
            cancel,
            status: status_rx,
        }
    }
}

/// Cancelable token for one open subscription. Closing is idempotent and
/// also happens on drop.
pub struct SubscriptionHandle {
    id: String,
    spec: StreamSpec,
    gate: Arc<DeliveryGate>,
    cancel: CancellationToken,
    status: watch::Receiver<SubscriptionStatus>,
}

impl SubscriptionHandle {
    /// Returns `true` only for the call that actually closed the handle.
    pub fn close(&self) -> bool {
        let closed = self.gate.close();
        self.cancel.cancel();
        if closed {
            tracing::debug!(
                event = "subscription_close",
                subscription_id = %self.id,
                table = %self.spec.table,
                filter_field = %self.spec.filter.field,
                "subscription close requested"
            );
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    pub fn status(&self) -> SubscriptionStatus {
        if self.is_closed() {
            return SubscriptionStatus::Closed;
        }
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum FeedEnd {
    Cancelled,
    Dropped(String),
}

struct SubscriptionWorker {
    id: String,
    backend: Arc<dyn ChangeStreamBackend>,
    spec: StreamSpec,
    policy: ReconnectPolicy,
    gate: Arc<DeliveryGate>,
    cancel: CancellationToken,
    status: watch::Sender<SubscriptionStatus>,
}

impl SubscriptionWorker {
    async fn run(self) {
        let mut failures = 0usize;
        loop {
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.backend.subscribe(&self.spec) => result,
            };
            match opened {
                Ok(feed) => {
                    failures = 0;
                    self.set_status(SubscriptionStatus::Connected);
                    tracing::debug!(
                        event = "subscription_connected",
                        subscription_id = %self.id,
                        backend = %self.backend.backend_id(),
                        table = %self.spec.table,
                        event_kind = ?self.spec.event_kind,
                        "change stream connected"
                    );
                    match self.pump(feed).await {
                        FeedEnd::Cancelled => break,
                        FeedEnd::Dropped(reason) => {
                            tracing::warn!(
                                event = "subscription_dropped",
                                subscription_id = %self.id,
                                table = %self.spec.table,
                                reason = %reason,
                                "change stream disconnected"
                            );
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        event = "subscription_open_failed",
                        subscription_id = %self.id,
                        table = %self.spec.table,
                        error = %err,
                        attempts = failures + 1,
                        "change stream open failed"
                    );
                }
            }
            failures += 1;
            let delay = if failures > self.policy.max_attempts {
                if *self.status.borrow() != SubscriptionStatus::Degraded {
                    tracing::warn!(
                        event = "subscription_degraded",
                        subscription_id = %self.id,
                        table = %self.spec.table,
                        attempts = failures,
                        "reconnect attempts exhausted"
                    );
                }
                self.set_status(SubscriptionStatus::Degraded);
                self.policy.degraded_probe
            } else {
                self.set_status(SubscriptionStatus::Reconnecting { attempt: failures });
                compute_backoff(failures, &self.policy)
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.set_status(SubscriptionStatus::Closed);
        tracing::debug!(
            event = "subscription_closed",
            subscription_id = %self.id,
            table = %self.spec.table,
            "change stream detached"
        );
    }

    async fn pump(&self, mut feed: crate::stream::backend::ChangeFeed) -> FeedEnd {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return FeedEnd::Cancelled,
                item = feed.next() => item,
            };
            match next {
                Some(Ok(record)) => {
                    if !self.spec.accepts(&record) {
                        tracing::debug!(
                            event = "subscription_out_of_scope",
                            subscription_id = %self.id,
                            table = %record.table,
                            event_kind = ?record.event_kind,
                            "record outside subscription scope dropped"
                        );
                        continue;
                    }
                    if !self.gate.deliver(record) {
                        return FeedEnd::Cancelled;
                    }
                }
                Some(Err(err)) => return FeedEnd::Dropped(err.to_string()),
                None => return FeedEnd::Dropped("stream ended".to_string()),
            }
        }
    }

    fn set_status(&self, status: SubscriptionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            max_attempts: 3,
            degraded_probe: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(compute_backoff(1, &policy), Duration::from_millis(100));
        assert_eq!(compute_backoff(2, &policy), Duration::from_millis(200));
        assert_eq!(compute_backoff(4, &policy), Duration::from_millis(800));
        assert_eq!(compute_backoff(5, &policy), Duration::from_millis(1000));
        assert_eq!(compute_backoff(64, &policy), Duration::from_millis(1000));
    }

    #[test]
    fn gate_stops_delivery_after_close() {
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let gate = DeliveryGate::new(Arc::new(move |_| {
            *counter.lock().unwrap() += 1;
        }));
        let record = ChangeRecord::insert("wash_requests", serde_json::json!({}));
        assert!(gate.deliver(record.clone()));
        assert!(gate.close());
        assert!(!gate.close());
        assert!(!gate.deliver(record));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn close_from_inside_callback_does_not_deadlock() {
        let slot: Arc<Mutex<Option<Arc<DeliveryGate>>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let gate = Arc::new(DeliveryGate::new(Arc::new(move |_| {
            if let Some(gate) = inner.lock().unwrap().as_ref() {
                gate.close();
            }
        })));
        *slot.lock().unwrap() = Some(Arc::clone(&gate));
        let record = ChangeRecord::insert("wash_requests", serde_json::json!({}));
        assert!(gate.deliver(record.clone()));
        assert!(gate.is_closed());
        assert!(!gate.deliver(record));
        slot.lock().unwrap().take();
    }
}

use crate::identity::valid_scope;
use crate::notifications::classify::{classify_accepted, classify_cancelled, classify_new_request};
use crate::stream::record::{
    CLIENT_ORGANIZATION_ID, EventKind, RequestStatus, STATUS, ScopeFilter, StreamSpec,
};
use crate::stream::subscription::{ChangeStreamSubscriber, SubscriptionHandle, SubscriptionStatus};

/// Tears down one role listener. Safe to call any number of times; a
/// listener that never opened a subscription cleans up to nothing.
#[derive(Debug, Default)]
pub struct ListenerCleanup {
    handle: Option<SubscriptionHandle>,
}

impl ListenerCleanup {
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.handle.is_none()
    }

    pub fn cleanup(&self) {
        if let Some(handle) = self.handle.as_ref() {
            handle.close();
        }
    }

    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.handle.as_ref().map(SubscriptionHandle::status)
    }
}

#[derive(Clone)]
pub struct RoleListenerFactory {
    subscriber: ChangeStreamSubscriber,
    table: String,
}

impl RoleListenerFactory {
    pub fn new(subscriber: ChangeStreamSubscriber, table: impl Into<String>) -> Self {
        Self {
            subscriber,
            table: table.into(),
        }
    }

    /// New pending requests, for any provider.
    pub fn for_providers<F>(&self, on_new_request: F) -> ListenerCleanup
    where
        F: Fn(String, Option<String>) + Send + Sync + 'static,
    {
        let spec = StreamSpec::new(
            self.table.clone(),
            EventKind::Insert,
            ScopeFilter::equals(STATUS, RequestStatus::Pending.as_str()),
        );
        let handle = self.subscriber.open(spec, move |record| {
            match classify_new_request(&record) {
                Some(intent) => on_new_request(intent.request_id, intent.address),
                None => skip("new_request"),
            }
        });
        ListenerCleanup {
            handle: Some(handle),
        }
    }

    pub fn for_clients<F>(&self, organization_id: Option<&str>, on_accepted: F) -> ListenerCleanup
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let Some(organization_id) = scoped("request_accepted", organization_id) else {
            return ListenerCleanup::noop();
        };
        let spec = self.client_spec(&organization_id);
        let handle = self.subscriber.open(spec, move |record| {
            match classify_accepted(&record, &organization_id) {
                Some(intent) => on_accepted(intent.request_id),
                None => skip("request_accepted"),
            }
        });
        ListenerCleanup {
            handle: Some(handle),
        }
    }

    pub fn for_cancelled_requests<F>(
        &self,
        organization_id: Option<&str>,
        on_cancelled: F,
    ) -> ListenerCleanup
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let Some(organization_id) = scoped("request_cancelled", organization_id) else {
            return ListenerCleanup::noop();
        };
        let spec = self.client_spec(&organization_id);
        let handle = self.subscriber.open(spec, move |record| {
            match classify_cancelled(&record, &organization_id) {
                Some(intent) => on_cancelled(intent.request_id),
                None => skip("request_cancelled"),
            }
        });
        ListenerCleanup {
            handle: Some(handle),
        }
    }

    fn client_spec(&self, organization_id: &str) -> StreamSpec {
        StreamSpec::new(
            self.table.clone(),
            EventKind::Update,
            ScopeFilter::equals(CLIENT_ORGANIZATION_ID, organization_id),
        )
    }
}

fn scoped(listener: &str, organization_id: Option<&str>) -> Option<String> {
    let scope = valid_scope(organization_id).map(str::to_string);
    if scope.is_none() {
        tracing::warn!(
            event = "listener_unscoped",
            listener = %listener,
            "missing organization scope; listener not opened"
        );
    }
    scope
}

fn skip(listener: &str) {
    tracing::debug!(
        event = "classification_skipped",
        listener = %listener,
        "record did not classify"
    );
}

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::identity::{IdentityContext, Role};
use crate::notifications::dispatcher::LocalNotificationDispatcher;
use crate::notifications::intent::NotificationIntent;
use crate::notifications::listeners::{ListenerCleanup, RoleListenerFactory};
use crate::notifications::permission::PermissionGate;
use crate::notifications::router::{Navigator, NotificationTapRouter, RouteRegistration};
use crate::platform::NotificationPlatform;
use crate::stream::backend::ChangeStreamBackend;
use crate::stream::subscription::{ChangeStreamSubscriber, ReconnectPolicy, SubscriptionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionState {
    Unregistered,
    Registering,
    Active,
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineHealth {
    /// No open subscriptions.
    Idle,
    Connecting,
    Healthy,
    Reconnecting,
    Degraded,
}

/// Wires change streams, permission, dispatch and tap routing together and
/// hands out one [`LifecycleHandle`] per mounted role section.
#[derive(Clone)]
pub struct NotificationPipeline {
    listeners: RoleListenerFactory,
    gate: PermissionGate,
    dispatcher: LocalNotificationDispatcher,
    router: NotificationTapRouter,
    platform: Arc<dyn NotificationPlatform>,
    sections: Arc<DashMap<String, Role>>,
}

impl NotificationPipeline {
    pub fn new(
        backend: Arc<dyn ChangeStreamBackend>,
        platform: Arc<dyn NotificationPlatform>,
        navigator: Arc<dyn Navigator>,
        config: &Config,
    ) -> Self {
        let stream = config.stream();
        let subscriber = ChangeStreamSubscriber::new(backend, ReconnectPolicy::from(&stream));
        Self {
            listeners: RoleListenerFactory::new(subscriber, stream.table()),
            gate: PermissionGate::new(Arc::clone(&platform)),
            dispatcher: LocalNotificationDispatcher::new(
                Arc::clone(&platform),
                config.notifications().dispatch_log_capacity(),
            ),
            router: NotificationTapRouter::new(navigator),
            platform,
            sections: Arc::new(DashMap::new()),
        }
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    pub fn dispatcher(&self) -> &LocalNotificationDispatcher {
        &self.dispatcher
    }

    pub fn router(&self) -> &NotificationTapRouter {
        &self.router
    }

    /// Attaches the process-wide tap listener; repeated calls are no-ops.
    pub async fn start_tap_routing(&self) -> bool {
        self.router.start(Arc::clone(&self.platform)).await
    }

    pub fn active_sections(&self) -> usize {
        self.sections.len()
    }

    /// Mounts the role section for `identity`. The returned handle starts in
    /// `Registering` while permission is checked, then opens exactly the
    /// listeners for the identity's role.
    pub fn register(&self, identity: IdentityContext) -> LifecycleHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let (state_tx, state_rx) = watch::channel(SectionState::Unregistered);
        let section = Arc::new(Section {
            id: id.clone(),
            identity,
            inner: Mutex::new(SectionInner::default()),
            state: state_tx,
            cancel: CancellationToken::new(),
        });
        self.sections.insert(id, section.identity.role);
        section.transition(SectionState::Registering);
        let pipeline = self.clone();
        let task_section = Arc::clone(&section);
        tokio::spawn(async move {
            pipeline.activate(task_section).await;
        });
        LifecycleHandle {
            section,
            sections: Arc::clone(&self.sections),
            state: state_rx,
        }
    }

    async fn activate(&self, section: Arc<Section>) {
        let permitted = tokio::select! {
            _ = section.cancel.cancelled() => return,
            permitted = self.gate.request_permission() => permitted,
        };
        if !permitted {
            tracing::info!(
                event = "section_permission_denied",
                section_id = %section.id,
                role = %section.identity.role.as_str(),
                "listening without notification permission; dispatch re-checks"
            );
        }
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let Ok(mut inner) = section.inner.lock() else {
                return;
            };
            if inner.torn_down {
                return;
            }
            inner.listeners = self.open_listeners(&section.identity, tx);
            if section.identity.role != Role::Admin {
                inner.route = Some(self.router.register(section.identity.role));
            }
            section.transition(SectionState::Active);
        }
        self.pump(section, rx).await;
    }

    fn open_listeners(
        &self,
        identity: &IdentityContext,
        tx: mpsc::UnboundedSender<NotificationIntent>,
    ) -> Vec<ListenerCleanup> {
        match identity.role {
            Role::Provider => {
                let cleanup = self.listeners.for_providers(move |request_id, address| {
                    let _ = tx.send(NotificationIntent::new_request(request_id, address));
                });
                vec![cleanup]
            }
            Role::Client => {
                let scope = identity.scope().map(str::to_string);
                let accepted_tx = tx.clone();
                let accepted_scope = scope.clone();
                let accepted = self.listeners.for_clients(scope.as_deref(), move |request_id| {
                    let _ = accepted_tx.send(NotificationIntent::accepted(
                        request_id,
                        accepted_scope.clone(),
                    ));
                });
                let cancelled_scope = scope.clone();
                let on_cancelled = move |request_id: String| {
                    let _ = tx.send(NotificationIntent::cancelled(
                        request_id,
                        cancelled_scope.clone(),
                    ));
                };
                let cancelled = self
                    .listeners
                    .for_cancelled_requests(scope.as_deref(), on_cancelled);
                vec![accepted, cancelled]
                    .into_iter()
                    .filter(|cleanup| !cleanup.is_noop())
                    .collect()
            }
            Role::Admin => Vec::new(),
        }
    }

    async fn pump(
        &self,
        section: Arc<Section>,
        mut rx: mpsc::UnboundedReceiver<NotificationIntent>,
    ) {
        loop {
            let intent = tokio::select! {
                _ = section.cancel.cancelled() => break,
                intent = rx.recv() => intent,
            };
            let Some(intent) = intent else {
                break;
            };
            let pipeline = self.clone();
            let section = Arc::clone(&section);
            tokio::spawn(async move {
                pipeline.deliver(&section, intent).await;
            });
        }
    }

    async fn deliver(&self, section: &Section, intent: NotificationIntent) {
        if section.cancel.is_cancelled() {
            return;
        }
        let permitted = self.gate.request_permission().await;
        if !permitted || section.cancel.is_cancelled() {
            tracing::debug!(
                event = "intent_dropped",
                section_id = %section.id,
                kind = %intent.kind.as_str(),
                request_id = %intent.request_id,
                permitted,
                "notification intent not dispatched"
            );
            return;
        }
        self.dispatcher.show_intent_until(&intent, &section.cancel).await;
    }
}

#[derive(Debug, Default)]
struct SectionInner {
    torn_down: bool,
    listeners: Vec<ListenerCleanup>,
    route: Option<RouteRegistration>,
}

struct Section {
    id: String,
    identity: IdentityContext,
    inner: Mutex<SectionInner>,
    state: watch::Sender<SectionState>,
    cancel: CancellationToken,
}

impl Section {
    fn transition(&self, next: SectionState) {
        let previous = self.state.send_replace(next);
        tracing::info!(
            event = "section_state",
            section_id = %self.id,
            user_id = %self.identity.user_id,
            role = %self.identity.role.as_str(),
            from = ?previous,
            to = ?next,
            "role section state changed"
        );
    }
}

/// Explicit registration handle for one mounted role section.
/// `dispose` may be called at any point, including mid-registration, and
/// any number of times. Dropping the handle disposes it.
pub struct LifecycleHandle {
    section: Arc<Section>,
    sections: Arc<DashMap<String, Role>>,
    state: watch::Receiver<SectionState>,
}

impl LifecycleHandle {
    pub fn identity(&self) -> &IdentityContext {
        &self.section.identity
    }

    pub fn state(&self) -> SectionState {
        *self.state.borrow()
    }

    /// Waits until registration has finished, one way or the other.
    pub async fn ready(&self) -> SectionState {
        let mut receiver = self.state.clone();
        let settled = receiver
            .wait_for(|state| {
                !matches!(state, SectionState::Unregistered | SectionState::Registering)
            })
            .await
            .map(|state| *state);
        settled.unwrap_or_else(|_| self.state())
    }

    pub fn subscription_count(&self) -> usize {
        self.section
            .inner
            .lock()
            .map(|inner| inner.listeners.len())
            .unwrap_or_default()
    }

    pub fn health(&self) -> PipelineHealth {
        let statuses: Vec<SubscriptionStatus> = self
            .section
            .inner
            .lock()
            .map(|inner| inner.listeners.iter().filter_map(ListenerCleanup::status).collect())
            .unwrap_or_default();
        aggregate_health(&statuses)
    }

    /// Returns `true` only for the call that tore the section down. All
    /// subscriptions have been asked to close by the time this returns.
    pub fn dispose(&self) -> bool {
        let (listeners, route) = {
            let Ok(mut inner) = self.section.inner.lock() else {
                return false;
            };
            if inner.torn_down {
                return false;
            }
            inner.torn_down = true;
            (std::mem::take(&mut inner.listeners), inner.route.take())
        };
        self.section.cancel.cancel();
        for listener in &listeners {
            listener.cleanup();
        }
        drop(route);
        self.sections.remove(&self.section.id);
        self.section.transition(SectionState::TornDown);
        true
    }
}

impl Drop for LifecycleHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

pub fn aggregate_health(statuses: &[SubscriptionStatus]) -> PipelineHealth {
    let live: Vec<&SubscriptionStatus> = statuses
        .iter()
        .filter(|status| **status != SubscriptionStatus::Closed)
        .collect();
    if live.is_empty() {
        return PipelineHealth::Idle;
    }
    if live.iter().any(|status| **status == SubscriptionStatus::Degraded) {
        return PipelineHealth::Degraded;
    }
    if live
        .iter()
        .any(|status| matches!(status, SubscriptionStatus::Reconnecting { .. }))
    {
        return PipelineHealth::Reconnecting;
    }
    if live.iter().any(|status| **status == SubscriptionStatus::Connecting) {
        return PipelineHealth::Connecting;
    }
    PipelineHealth::Healthy
}

/// Keeps exactly one role section registered for the current identity.
/// Any change of user, role or organization tears the old section down and
/// registers a new one; `None` (logged out) leaves nothing registered.
/// Returns when the identity sender is dropped.
pub async fn run_identity_loop(
    pipeline: NotificationPipeline,
    mut identities: watch::Receiver<Option<IdentityContext>>,
) {
    let mut current: Option<LifecycleHandle> = None;
    loop {
        let next = identities.borrow_and_update().clone();
        let unchanged = match (current.as_ref(), next.as_ref()) {
            (Some(handle), Some(identity)) => handle.identity() == identity,
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            if let Some(handle) = current.take() {
                handle.dispose();
            }
            if let Some(identity) = next {
                tracing::info!(
                    event = "identity_changed",
                    user_id = %identity.user_id,
                    role = %identity.role.as_str(),
                    "registering role section for new identity"
                );
                current = Some(pipeline.register(identity));
            }
        }
        if identities.changed().await.is_err() {
            break;
        }
    }
    if let Some(handle) = current.take() {
        handle.dispose();
    }
}

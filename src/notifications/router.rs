use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::identity::Role;
use crate::notifications::intent::TapPayload;
use crate::platform::{NotificationPlatform, TapEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationTarget {
    pub role: Role,
    pub request_id: String,
}

impl NavigationTarget {
    /// Logical deep-link route, e.g. `provider/requests/detail?id=r1`.
    pub fn route(&self) -> String {
        format!("{}/requests/detail?id={}", self.role.as_str(), self.request_id)
    }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, target: NavigationTarget);
}

/// Maps tapped notification data to a detail screen for `role`. Admins have
/// no request detail destination.
pub fn resolve(data: &Value, role: Role) -> Option<NavigationTarget> {
    let payload = TapPayload::parse(data)?;
    match role {
        Role::Client | Role::Provider => Some(NavigationTarget {
            role,
            request_id: payload.request_id,
        }),
        Role::Admin => None,
    }
}

type ScopeStack = Arc<Mutex<Vec<(String, Role)>>>;

/// Owns the one process-wide tap listener. Role sections register a route
/// scope; a tap is routed once, through the most recently registered scope.
#[derive(Clone)]
pub struct NotificationTapRouter {
    navigator: Arc<dyn Navigator>,
    scopes: ScopeStack,
    listener: Arc<Mutex<Option<CancellationToken>>>,
}

impl NotificationTapRouter {
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self {
            navigator,
            scopes: Arc::new(Mutex::new(Vec::new())),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts listening for taps. While a listener is attached, further
    /// calls return `false`; after [`Self::stop`] the router can start again.
    pub async fn start(&self, platform: Arc<dyn NotificationPlatform>) -> bool {
        let cancel = {
            let Ok(mut listener) = self.listener.lock() else {
                return false;
            };
            if listener.is_some() {
                return false;
            }
            let cancel = CancellationToken::new();
            *listener = Some(cancel.clone());
            cancel
        };
        let mut taps = platform.taps().await;
        let router = self.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = taps.next() => event,
                };
                match next {
                    Some(event) => {
                        router.route_tap(&event);
                    }
                    None => break,
                }
            }
            tracing::debug!(event = "tap_listener_stopped", "notification tap listener stopped");
        });
        true
    }

    /// Detaches the tap listener. Registered route scopes are kept.
    pub fn stop(&self) {
        let cancel = self
            .listener
            .lock()
            .ok()
            .and_then(|mut listener| listener.take());
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
    }

    pub fn register(&self, role: Role) -> RouteRegistration {
        let id = uuid::Uuid::new_v4().to_string();
        if let Ok(mut scopes) = self.scopes.lock() {
            scopes.push((id.clone(), role));
        }
        RouteRegistration {
            id,
            scopes: Arc::clone(&self.scopes),
        }
    }

    pub fn active_role(&self) -> Option<Role> {
        self.scopes
            .lock()
            .ok()
            .and_then(|scopes| scopes.last().map(|(_, role)| *role))
    }

    pub fn route_tap(&self, event: &TapEvent) -> Option<NavigationTarget> {
        let Some(role) = self.active_role() else {
            tracing::debug!(
                event = "tap_ignored",
                reason = "no_active_section",
                "notification tap ignored"
            );
            return None;
        };
        let Some(target) = resolve(&event.data, role) else {
            tracing::debug!(
                event = "tap_ignored",
                reason = "unroutable_payload",
                role = %role.as_str(),
                "notification tap ignored"
            );
            return None;
        };
        tracing::info!(
            event = "tap_routed",
            role = %role.as_str(),
            request_id = %target.request_id,
            route = %target.route(),
            "notification tap routed"
        );
        self.navigator.navigate(target.clone());
        Some(target)
    }
}

/// A role section's claim on tap routing; released on `unregister` or drop.
#[derive(Debug)]
pub struct RouteRegistration {
    id: String,
    scopes: ScopeStack,
}

impl RouteRegistration {
    pub fn unregister(&self) {
        if let Ok(mut scopes) = self.scopes.lock() {
            scopes.retain(|(id, _)| id != &self.id);
        }
    }
}

impl Drop for RouteRegistration {
    fn drop(&mut self) {
        self.unregister();
    }
}

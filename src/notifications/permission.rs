use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::error::PlatformResult;
use crate::platform::{NotificationPlatform, PermissionState};

/// Process-wide notification permission check.
///
/// Every call consults the platform, so a permission revoked in system
/// settings is seen immediately. Only prompts are serialized, so overlapping
/// calls on an undetermined permission show the OS prompt once.
#[derive(Clone)]
pub struct PermissionGate {
    platform: Arc<dyn NotificationPlatform>,
    in_flight: Arc<AsyncMutex<()>>,
    last_known: Arc<Mutex<Option<PermissionState>>>,
}

impl PermissionGate {
    pub fn new(platform: Arc<dyn NotificationPlatform>) -> Self {
        Self {
            platform,
            in_flight: Arc::new(AsyncMutex::new(())),
            last_known: Arc::new(Mutex::new(None)),
        }
    }

    /// Prompts only when the platform reports the permission as undetermined.
    /// Settled answers are read without queueing behind other callers.
    pub async fn request_permission(&self) -> bool {
        let state = match self.platform.permission_state().await {
            Ok(PermissionState::Undetermined) => self.prompt_once().await,
            other => other,
        };
        let state = match state {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(
                    event = "permission_query_failed",
                    platform = %self.platform.platform_id(),
                    error = %err,
                    "notification permission unavailable"
                );
                PermissionState::Denied
            }
        };
        self.remember(state);
        if !state.is_granted() {
            tracing::info!(
                event = "permission_denied",
                platform = %self.platform.platform_id(),
                state = ?state,
                "notification permission not granted"
            );
        }
        state.is_granted()
    }

    /// A caller that waited behind another prompt re-reads the answered state.
    async fn prompt_once(&self) -> PlatformResult<PermissionState> {
        let _serial = self.in_flight.lock().await;
        match self.platform.permission_state().await? {
            PermissionState::Undetermined => self.platform.request_permission().await,
            settled => Ok(settled),
        }
    }

    /// The answer seen by the most recent check, if any. Informational only.
    pub fn last_known(&self) -> Option<PermissionState> {
        self.last_known.lock().ok().and_then(|state| *state)
    }

    fn remember(&self, state: PermissionState) {
        if let Ok(mut last) = self.last_known.lock() {
            *last = Some(state);
        }
    }
}

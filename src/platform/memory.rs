use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::{
    NotificationPlatform, PermissionState, PlatformNotification, TapEvent, TapStream,
};

#[derive(Debug)]
struct PlatformState {
    permission: PermissionState,
    prompt_answer: PermissionState,
    presented: Vec<PlatformNotification>,
    tap_listeners: Vec<mpsc::UnboundedSender<TapEvent>>,
}

/// Scriptable stand-in for the OS notification layer.
#[derive(Clone)]
pub struct InMemoryPlatform {
    state: Arc<Mutex<PlatformState>>,
    prompts: Arc<AtomicUsize>,
    failing_presents: Arc<AtomicUsize>,
    prompt_delay: Duration,
    query_delay: Duration,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new(PermissionState::Granted)
    }
}

impl InMemoryPlatform {
    pub fn new(permission: PermissionState) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlatformState {
                permission,
                prompt_answer: PermissionState::Granted,
                presented: Vec::new(),
                tap_listeners: Vec::new(),
            })),
            prompts: Arc::new(AtomicUsize::new(0)),
            failing_presents: Arc::new(AtomicUsize::new(0)),
            prompt_delay: Duration::ZERO,
            query_delay: Duration::ZERO,
        }
    }

    pub fn with_prompt_delay(mut self, delay: Duration) -> Self {
        self.prompt_delay = delay;
        self
    }

    /// Latency of every permission query, as a slow OS bridge would add.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    /// What the simulated user answers when prompted.
    pub fn answer_prompts_with(&self, answer: PermissionState) {
        if let Ok(mut state) = self.state.lock() {
            state.prompt_answer = answer;
        }
    }

    /// Changes the permission from outside the app, as the system settings would.
    pub fn set_permission(&self, permission: PermissionState) {
        if let Ok(mut state) = self.state.lock() {
            state.permission = permission;
        }
    }

    pub fn fail_next_presents(&self, count: usize) {
        self.failing_presents.store(count, Ordering::SeqCst);
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn presented(&self) -> Vec<PlatformNotification> {
        self.state
            .lock()
            .map(|state| state.presented.clone())
            .unwrap_or_default()
    }

    /// Simulates the user tapping a notification carrying `data`.
    pub fn tap(&self, data: Value) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        state.tap_listeners.retain(|tx| !tx.is_closed());
        let event = TapEvent {
            notification_id: None,
            data,
        };
        state
            .tap_listeners
            .iter()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    fn current(&self) -> PlatformResult<PermissionState> {
        self.state
            .lock()
            .map(|state| state.permission)
            .map_err(|_| PlatformError::Permission("platform state poisoned".to_string()))
    }
}

#[async_trait]
impl NotificationPlatform for InMemoryPlatform {
    fn platform_id(&self) -> &str {
        "memory"
    }

    async fn permission_state(&self) -> PlatformResult<PermissionState> {
        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }
        self.current()
    }

    async fn request_permission(&self) -> PlatformResult<PermissionState> {
        if self.current()? != PermissionState::Undetermined {
            return self.current();
        }
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if !self.prompt_delay.is_zero() {
            tokio::time::sleep(self.prompt_delay).await;
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| PlatformError::Permission("platform state poisoned".to_string()))?;
        state.permission = state.prompt_answer;
        Ok(state.permission)
    }

    async fn present(&self, notification: PlatformNotification) -> PlatformResult<()> {
        let failed = self
            .failing_presents
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failed {
            return Err(PlatformError::Present("presentation rejected".to_string()));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| PlatformError::Present("platform state poisoned".to_string()))?;
        state.presented.push(notification);
        Ok(())
    }

    async fn taps(&self) -> TapStream {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.state.lock() {
            state.tap_listeners.push(tx);
        }
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::notifications::intent::{NotificationIntent, PAYLOAD_TYPE};
use crate::platform::{NotificationPlatform, PlatformNotification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Shown,
    SuppressedPermission,
    /// The owning section was torn down before presentation.
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub id: String,
    pub kind: Option<String>,
    pub status: DispatchStatus,
    pub error: Option<String>,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Bounded history of dispatch outcomes, oldest dropped first.
#[derive(Debug, Clone)]
pub struct DispatchLog {
    records: Arc<Mutex<VecDeque<DispatchRecord>>>,
    capacity: usize,
}

impl DispatchLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    fn push(&self, record: DispatchRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push_back(record);
            while records.len() > self.capacity {
                records.pop_front();
            }
        }
    }

    pub fn snapshot(&self) -> Vec<DispatchRecord> {
        self.records
            .lock()
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, status: DispatchStatus) -> usize {
        self.records
            .lock()
            .map(|records| records.iter().filter(|record| record.status == status).count())
            .unwrap_or_default()
    }
}

/// Single point of contact with the platform's presentation facility.
#[derive(Clone)]
pub struct LocalNotificationDispatcher {
    platform: Arc<dyn NotificationPlatform>,
    log: DispatchLog,
}

impl LocalNotificationDispatcher {
    pub fn new(platform: Arc<dyn NotificationPlatform>, log_capacity: usize) -> Self {
        Self {
            platform,
            log: DispatchLog::new(log_capacity),
        }
    }

    pub fn log(&self) -> &DispatchLog {
        &self.log
    }

    /// Presents a notification. Permission is re-read at render time and a
    /// denial drops the notification silently. Presentation failures are
    /// logged and never retried.
    pub async fn show(&self, title: &str, body: &str, payload: Value) -> DispatchStatus {
        self.dispatch(title, body, payload, None).await
    }

    /// Presents `intent` unless `live` has been cancelled. The token is
    /// checked again immediately before presentation.
    pub async fn show_intent_until(
        &self,
        intent: &NotificationIntent,
        live: &CancellationToken,
    ) -> DispatchStatus {
        self.dispatch(intent.title(), &intent.body(), intent.payload(), Some(live)).await
    }

    async fn dispatch(
        &self,
        title: &str,
        body: &str,
        payload: Value,
        live: Option<&CancellationToken>,
    ) -> DispatchStatus {
        let id = uuid::Uuid::new_v4().to_string();
        let kind = payload
            .get(PAYLOAD_TYPE)
            .and_then(Value::as_str)
            .map(str::to_string);
        let permitted = match self.platform.permission_state().await {
            Ok(state) => state.is_granted(),
            Err(_) => false,
        };
        if !permitted {
            tracing::info!(
                event = "notification_suppressed",
                platform = %self.platform.platform_id(),
                notification_id = %id,
                kind = ?kind,
                "permission denied at render time"
            );
            self.record(id, kind, DispatchStatus::SuppressedPermission, None);
            return DispatchStatus::SuppressedPermission;
        }
        if live.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(
                event = "notification_cancelled",
                notification_id = %id,
                kind = ?kind,
                "section torn down before presentation"
            );
            self.record(id, kind, DispatchStatus::Cancelled, None);
            return DispatchStatus::Cancelled;
        }
        let notification = PlatformNotification {
            id: id.clone(),
            title: title.to_string(),
            body: body.to_string(),
            data: payload,
        };
        match self.platform.present(notification).await {
            Ok(()) => {
                tracing::debug!(
                    event = "notification_shown",
                    platform = %self.platform.platform_id(),
                    notification_id = %id,
                    kind = ?kind,
                    "local notification presented"
                );
                self.record(id, kind, DispatchStatus::Shown, None);
                DispatchStatus::Shown
            }
            Err(err) => {
                tracing::warn!(
                    event = "notification_failed",
                    platform = %self.platform.platform_id(),
                    notification_id = %id,
                    kind = ?kind,
                    error = %err,
                    "local notification presentation failed"
                );
                self.record(id, kind, DispatchStatus::Failed, Some(err.to_string()));
                DispatchStatus::Failed
            }
        }
    }

    fn record(
        &self,
        id: String,
        kind: Option<String>,
        status: DispatchStatus,
        error: Option<String>,
    ) {
        self.log.push(DispatchRecord {
            id,
            kind,
            status,
            error,
            recorded_at: chrono::Utc::now(),
        });
    }
}

pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlatformResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    Undetermined,
}

impl PermissionState {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionState::Granted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformNotification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// A user tap on a presented notification. `data` is whatever was passed
/// to `present`, untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TapEvent {
    pub notification_id: Option<String>,
    pub data: Value,
}

pub type TapStream = Pin<Box<dyn Stream<Item = TapEvent> + Send>>;

/// The operating system's local notification facility.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    fn platform_id(&self) -> &str;
    /// Current permission, without prompting.
    async fn permission_state(&self) -> PlatformResult<PermissionState>;
    /// Prompts the user when the permission is still undetermined.
    async fn request_permission(&self) -> PlatformResult<PermissionState>;
    async fn present(&self, notification: PlatformNotification) -> PlatformResult<()>;
    async fn taps(&self) -> TapStream;
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    NewRequest,
    RequestAccepted,
    RequestCancelled,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::NewRequest => "new_request",
            IntentKind::RequestAccepted => "request_accepted",
            IntentKind::RequestCancelled => "request_cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new_request" => Some(IntentKind::NewRequest),
            "request_accepted" => Some(IntentKind::RequestAccepted),
            "request_cancelled" => Some(IntentKind::RequestCancelled),
            _ => None,
        }
    }
}

pub const PAYLOAD_TYPE: &str = "type";
pub const PAYLOAD_REQUEST_ID: &str = "requestId";
pub const PAYLOAD_ADDRESS: &str = "address";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub kind: IntentKind,
    pub request_id: String,
    pub address: Option<String>,
    /// Client organization the originating record belongs to, when known.
    pub organization_id: Option<String>,
}

impl NotificationIntent {
    pub fn new_request(request_id: impl Into<String>, address: Option<String>) -> Self {
        Self {
            kind: IntentKind::NewRequest,
            request_id: request_id.into(),
            address,
            organization_id: None,
        }
    }

    pub fn accepted(request_id: impl Into<String>, organization_id: Option<String>) -> Self {
        Self {
            kind: IntentKind::RequestAccepted,
            request_id: request_id.into(),
            address: None,
            organization_id,
        }
    }

    pub fn cancelled(request_id: impl Into<String>, organization_id: Option<String>) -> Self {
        Self {
            kind: IntentKind::RequestCancelled,
            request_id: request_id.into(),
            address: None,
            organization_id,
        }
    }

    /// Structured data attached to the rendered notification and handed
    /// back on tap.
    pub fn payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert(PAYLOAD_TYPE.to_string(), json!(self.kind.as_str()));
        payload.insert(PAYLOAD_REQUEST_ID.to_string(), json!(self.request_id));
        if let Some(address) = self.address.as_ref() {
            payload.insert(PAYLOAD_ADDRESS.to_string(), json!(address));
        }
        Value::Object(payload)
    }

    pub fn title(&self) -> &'static str {
        match self.kind {
            IntentKind::NewRequest => "New wash request",
            IntentKind::RequestAccepted => "Request accepted",
            IntentKind::RequestCancelled => "Request cancelled",
        }
    }

    pub fn body(&self) -> String {
        match self.kind {
            IntentKind::NewRequest => match self.address.as_deref() {
                Some(address) => format!("A new wash was requested at {address}"),
                None => "A new wash was requested".to_string(),
            },
            IntentKind::RequestAccepted => "A provider accepted your wash request".to_string(),
            IntentKind::RequestCancelled => "Your wash request was cancelled".to_string(),
        }
    }
}

/// The routable part of a tapped notification's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapPayload {
    pub kind: IntentKind,
    pub request_id: String,
}

impl TapPayload {
    /// `None` for unknown kinds or a missing request id.
    pub fn parse(data: &Value) -> Option<Self> {
        let kind = data
            .get(PAYLOAD_TYPE)
            .and_then(Value::as_str)
            .and_then(IntentKind::parse)?;
        let request_id = data
            .get(PAYLOAD_REQUEST_ID)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())?;
        Some(Self {
            kind,
            request_id: request_id.to_string(),
        })
    }
}

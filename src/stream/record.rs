use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table: String,
    pub event_kind: EventKind,
    #[serde(default)]
    pub new_row: Option<Value>,
    #[serde(default)]
    pub old_row: Option<Value>,
}

impl ChangeRecord {
    pub fn insert(table: impl Into<String>, new_row: Value) -> Self {
        Self {
            table: table.into(),
            event_kind: EventKind::Insert,
            new_row: Some(new_row),
            old_row: None,
        }
    }

    pub fn update(table: impl Into<String>, old_row: Value, new_row: Value) -> Self {
        Self {
            table: table.into(),
            event_kind: EventKind::Update,
            new_row: Some(new_row),
            old_row: Some(old_row),
        }
    }

    /// The row the scope filter applies to: the new image, or the old one for deletes.
    pub fn scoped_row(&self) -> Option<&Value> {
        match self.event_kind {
            EventKind::Delete => self.old_row.as_ref(),
            EventKind::Insert | EventKind::Update => self.new_row.as_ref(),
        }
    }
}

/// Field-equality constraint restricting which records a subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub field: String,
    pub value: String,
}

impl ScopeFilter {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &ChangeRecord) -> bool {
        record
            .scoped_row()
            .and_then(|row| field_text(row, &self.field))
            .is_some_and(|value| value == self.value)
    }
}

/// The (table, event kind, scope filter) triple identifying one change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamSpec {
    pub table: String,
    pub event_kind: EventKind,
    pub filter: ScopeFilter,
}

impl StreamSpec {
    pub fn new(table: impl Into<String>, event_kind: EventKind, filter: ScopeFilter) -> Self {
        Self {
            table: table.into(),
            event_kind,
            filter,
        }
    }

    pub fn accepts(&self, record: &ChangeRecord) -> bool {
        record.table == self.table
            && record.event_kind == self.event_kind
            && self.filter.matches(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

pub const REQUEST_ID: &str = "id";
pub const STATUS: &str = "status";
pub const CLIENT_ORGANIZATION_ID: &str = "client_organization_id";
pub const ADDRESS: &str = "address";

/// Read-only view of the wash-request columns classification looks at.
/// Every field is optional; unknown status strings read as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WashRequestView {
    pub id: Option<String>,
    pub status: Option<RequestStatus>,
    pub client_organization_id: Option<String>,
    pub address: Option<String>,
}

impl WashRequestView {
    pub fn from_row(row: &Value) -> Self {
        Self {
            id: field_text(row, REQUEST_ID),
            status: row
                .get(STATUS)
                .cloned()
                .and_then(|value| serde_json::from_value(value).ok()),
            client_organization_id: field_text(row, CLIENT_ORGANIZATION_ID),
            address: field_text(row, ADDRESS),
        }
    }
}

/// Strings and numbers are both accepted as ids; empty strings read as missing.
pub fn field_text(row: &Value, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

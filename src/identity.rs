use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Provider,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Provider => "provider",
            Role::Admin => "admin",
        }
    }
}

/// The authenticated user as seen by the notification pipeline.
///
/// Supplied by the session provider and never mutated here. Any change to
/// the role or organization means the role section must be registered again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    pub user_id: String,
    pub role: Role,
    pub organization_id: Option<String>,
}

impl IdentityContext {
    pub fn client(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Client,
            organization_id: Some(organization_id.into()),
        }
    }

    pub fn provider(user_id: impl Into<String>, organization_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Provider,
            organization_id,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Admin,
            organization_id: None,
        }
    }

    /// Organization id usable as a scope filter, if any.
    pub fn scope(&self) -> Option<&str> {
        valid_scope(self.organization_id.as_deref())
    }
}

/// Blank or whitespace-only ids are treated as absent.
pub fn valid_scope(organization_id: Option<&str>) -> Option<&str> {
    organization_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

use serde::{Deserialize, Serialize};

pub type UserId = i64;

/// `auth_by` recorded on sessions that never authenticated.
pub const GUEST_AUTH_BY: &str = "guest";

/// Durable, credentialed user row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredUser {
    pub id: UserId,
    pub login: String,
    pub name: String,
    pub auth_by: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
}

/// Exactly one of these is resolved for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Guest { session_id: String },
    Registered(RegisteredUser),
}

impl Identity {
    pub fn is_guest(&self) -> bool { matches!(self, Identity::Guest { .. }) }

    pub fn registered(&self) -> Option<&RegisteredUser> {
        match self {
            Identity::Registered(user) => Some(user),
            Identity::Guest { .. } => None,
        }
    }

    /// Key resource queries are scoped by: the user id, or the session id for guests.
    pub fn owner_key(&self) -> String {
        match self {
            Identity::Guest { session_id } => session_id.clone(),
            Identity::Registered(user) => user.id.to_string(),
        }
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::principal::UserId;
use crate::error::StoreError;

pub type SessionId = String;

/// Typed view over the session's key/value payload. Unknown keys survive a
/// load/save cycle through `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_request: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub data: SessionData,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { self.expires_at <= now }
}

/// Persistence for session records keyed by id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, sid: &str) -> Result<Option<Session>, StoreError>;
    async fn set(&self, session: &Session) -> Result<(), StoreError>;
    async fn destroy(&self, sid: &str) -> Result<(), StoreError>;
    async fn touch(&self, sid: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError>;
    /// Remove every record whose expiry is at or before `now`; returns how many went.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

fn gen_id() -> SessionId { uuid::Uuid::new_v4().to_string() }

/// Issues, loads, rotates and destroys sessions over an injected store.
#[derive(Clone)]
pub struct SessionManager {
    pub ttl: Duration,
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self { Self { ttl, store } }

    pub fn store(&self) -> &Arc<dyn SessionStore> { &self.store }

    /// Mint a fresh, empty session. Nothing is written until the caller saves it.
    pub fn issue(&self) -> Session {
        let sess = Session { id: gen_id(), data: SessionData::default(), expires_at: Utc::now() + self.ttl };
        debug!(target: "session", sid = %sess.id, ttl_secs = self.ttl.num_seconds(), "session.issue");
        sess
    }

    /// True once less than half the ttl remains.
    pub fn needs_refresh(&self, session: &Session) -> bool {
        session.expires_at - Utc::now() < self.ttl / 2
    }

    /// Load a live session. Expired records are destroyed and reported as absent.
    pub async fn load(&self, sid: &str) -> Result<Option<Session>, StoreError> {
        let Some(sess) = self.store.get(sid).await? else { return Ok(None); };
        if sess.is_expired_at(Utc::now()) {
            debug!(target: "session", sid = %sid, "session.expired");
            self.store.destroy(sid).await?;
            return Ok(None);
        }
        Ok(Some(sess))
    }

    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.store.set(session).await
    }

    /// Slide the expiry forward by one ttl.
    pub async fn touch(&self, session: &mut Session) -> Result<(), StoreError> {
        session.expires_at = Utc::now() + self.ttl;
        self.store.touch(&session.id, session.expires_at).await
    }

    /// Move `session` to a new id: the new record is written before the old one is dropped.
    pub async fn rotate(&self, session: &mut Session) -> Result<(), StoreError> {
        let old = std::mem::replace(&mut session.id, gen_id());
        session.expires_at = Utc::now() + self.ttl;
        self.store.set(session).await?;
        self.store.destroy(&old).await?;
        debug!(target: "session", old = %old, new = %session.id, "session.rotate");
        Ok(())
    }

    pub async fn destroy(&self, sid: &str) -> Result<(), StoreError> {
        self.store.destroy(sid).await?;
        debug!(target: "session", sid = %sid, "session.destroy");
        Ok(())
    }

    pub async fn prune_expired(&self) -> Result<u64, StoreError> {
        self.store.prune_expired(Utc::now()).await
    }
}

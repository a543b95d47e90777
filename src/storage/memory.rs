//! In-process stores. Each map sits behind its own `parking_lot::RwLock`; no lock is
//! held across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::identity::{RegisteredUser, Session, SessionStore, UserId};
use crate::resources::{Chart, Event, NewChart, NewEvent, ResourceStore};
use crate::users::{NewUser, UserPatch, UserStore};

#[derive(Default)]
pub struct MemorySessionStore {
    map: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn len(&self) -> usize { self.map.read().len() }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, sid: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.map.read().get(sid).cloned())
    }

    async fn set(&self, session: &Session) -> Result<(), StoreError> {
        self.map.write().insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn destroy(&self, sid: &str) -> Result<(), StoreError> {
        self.map.write().remove(sid);
        Ok(())
    }

    async fn touch(&self, sid: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(s) = self.map.write().get_mut(sid) { s.expires_at = expires_at; }
        Ok(())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut m = self.map.write();
        let before = m.len();
        m.retain(|_, s| !s.is_expired_at(now));
        Ok((before - m.len()) as u64)
    }
}

#[derive(Default)]
struct UserTable {
    rows: HashMap<UserId, RegisteredUser>,
    by_login: HashMap<String, UserId>,
    next_id: UserId,
}

#[derive(Default)]
pub struct MemoryUserStore {
    table: RwLock<UserTable>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<RegisteredUser>, StoreError> {
        Ok(self.table.read().rows.get(&id).cloned())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<RegisteredUser>, StoreError> {
        let t = self.table.read();
        Ok(t.by_login.get(login).and_then(|id| t.rows.get(id)).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<RegisteredUser, StoreError> {
        let mut t = self.table.write();
        if t.by_login.contains_key(&user.login) {
            return Err(StoreError::Duplicate(user.login));
        }
        t.next_id += 1;
        let row = RegisteredUser {
            id: t.next_id,
            login: user.login,
            name: user.name,
            auth_by: user.auth_by,
            email: user.email,
            password_hash: user.password_hash,
        };
        t.by_login.insert(row.login.clone(), row.id);
        t.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update(&self, id: UserId, patch: UserPatch) -> Result<RegisteredUser, StoreError> {
        let mut t = self.table.write();
        let row = t.rows.get_mut(&id).ok_or_else(|| StoreError::Missing(format!("user {}", id)))?;
        if let Some(name) = patch.name { row.name = name; }
        if let Some(email) = patch.email { row.email = Some(email); }
        if let Some(hash) = patch.password_hash { row.password_hash = hash; }
        Ok(row.clone())
    }
}

#[derive(Default)]
pub struct MemoryResourceStore {
    events: RwLock<Vec<Event>>,
    charts: RwLock<Vec<Chart>>,
    next_id: AtomicI64,
}

impl MemoryResourceStore {
    fn next_id(&self) -> i64 { self.next_id.fetch_add(1, Ordering::Relaxed) + 1 }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn list_events(&self, owner: &str) -> Result<Vec<Event>, StoreError> {
        Ok(self.events.read().iter().filter(|e| e.owner == owner).cloned().collect())
    }

    async fn add_event(&self, owner: &str, event: NewEvent) -> Result<Event, StoreError> {
        let row = Event { id: self.next_id(), owner: owner.to_string(), kind: event.kind, payload: event.payload, created_at: Utc::now() };
        self.events.write().push(row.clone());
        Ok(row)
    }

    async fn list_charts(&self, owner: &str) -> Result<Vec<Chart>, StoreError> {
        Ok(self.charts.read().iter().filter(|c| c.owner == owner).cloned().collect())
    }

    async fn add_chart(&self, owner: &str, chart: NewChart) -> Result<Chart, StoreError> {
        let row = Chart { id: self.next_id(), owner: owner.to_string(), title: chart.title, spec: chart.spec, created_at: Utc::now() };
        self.charts.write().push(row.clone());
        Ok(row)
    }
}

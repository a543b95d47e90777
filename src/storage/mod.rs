//!
//! veeta storage module
//! --------------------
//! Backing stores for sessions, users and per-identity resources. Two families
//! implement the same traits:
//! - `memory`: `parking_lot`-guarded maps, used by tests and when no database is configured.
//! - `postgres`: tables over a shared `tokio_postgres::Client`.
//!
//! `Stores` bundles one of each so the server can be wired without caring which.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::identity::SessionStore;
use crate::resources::ResourceStore;
use crate::users::UserStore;

pub mod memory;
pub mod postgres;

/// One handle per store trait, injected into the server state.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserStore>,
    pub resources: Arc<dyn ResourceStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(memory::MemorySessionStore::default()),
            users: Arc::new(memory::MemoryUserStore::default()),
            resources: Arc::new(memory::MemoryResourceStore::default()),
        }
    }

    /// Connect to Postgres, create missing tables, and hand out the three stores
    /// sharing one client.
    pub async fn postgres(url: &str, session_table: &str) -> Result<Self> {
        let client = postgres::connect(url).await?;
        let sessions = postgres::PgSessionStore::new(client.clone(), session_table)?;
        sessions.ensure_schema().await?;
        let users = postgres::PgUserStore::new(client.clone());
        users.ensure_schema().await?;
        let resources = postgres::PgResourceStore::new(client);
        resources.ensure_schema().await?;
        info!(target: "startup", session_table, "postgres stores ready");
        Ok(Self { sessions: Arc::new(sessions), users: Arc::new(users), resources: Arc::new(resources) })
    }
}

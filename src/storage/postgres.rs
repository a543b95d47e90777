//! Postgres-backed stores over one shared `tokio_postgres::Client`. The client
//! pipelines concurrent queries on its connection; the connection itself is
//! driven by a spawned task.

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use crate::error::StoreError;
use crate::identity::{RegisteredUser, Session, SessionData, SessionStore, UserId};
use crate::resources::{Chart, Event, NewChart, NewEvent, ResourceStore};
use crate::users::{NewUser, UserPatch, UserStore};

pub async fn connect(url: &str) -> Result<Arc<Client>> {
    let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(target: "storage", "postgres connection error: {}", e);
        }
    });
    info!(target: "storage", "postgres connected");
    Ok(Arc::new(client))
}

/// Table names are spliced into SQL, so only plain identifiers are accepted.
fn checked_table_name(name: &str) -> Result<String> {
    let ok = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if !ok { bail!("invalid session table name '{}'", name); }
    Ok(format!("\"{}\"", name))
}

pub struct PgSessionStore {
    client: Arc<Client>,
    table: String,
}

impl PgSessionStore {
    pub fn new(client: Arc<Client>, table: &str) -> Result<Self> {
        Ok(Self { client, table: checked_table_name(table)? })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} (sid VARCHAR NOT NULL PRIMARY KEY, sess JSON NOT NULL, expire TIMESTAMPTZ NOT NULL); \
             CREATE INDEX IF NOT EXISTS {idx} ON {t} (expire);",
            t = self.table,
            idx = format!("\"{}_expire_idx\"", self.table.trim_matches('"')),
        );
        self.client.batch_execute(&ddl).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn get(&self, sid: &str) -> Result<Option<Session>, StoreError> {
        let q = format!("SELECT sess, expire FROM {} WHERE sid = $1", self.table);
        let Some(row) = self.client.query_opt(&q, &[&sid]).await? else { return Ok(None); };
        let Json(data): Json<SessionData> = row.try_get(0)?;
        let expires_at: DateTime<Utc> = row.try_get(1)?;
        Ok(Some(Session { id: sid.to_string(), data, expires_at }))
    }

    async fn set(&self, session: &Session) -> Result<(), StoreError> {
        let q = format!(
            "INSERT INTO {} (sid, sess, expire) VALUES ($1, $2, $3) \
             ON CONFLICT (sid) DO UPDATE SET sess = EXCLUDED.sess, expire = EXCLUDED.expire",
            self.table
        );
        self.client.execute(&q, &[&session.id, &Json(&session.data), &session.expires_at]).await?;
        Ok(())
    }

    async fn destroy(&self, sid: &str) -> Result<(), StoreError> {
        let q = format!("DELETE FROM {} WHERE sid = $1", self.table);
        self.client.execute(&q, &[&sid]).await?;
        Ok(())
    }

    async fn touch(&self, sid: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        let q = format!("UPDATE {} SET expire = $2 WHERE sid = $1", self.table);
        self.client.execute(&q, &[&sid, &expires_at]).await?;
        Ok(())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let q = format!("DELETE FROM {} WHERE expire <= $1", self.table);
        Ok(self.client.execute(&q, &[&now]).await?)
    }
}

const USER_COLUMNS: &str = "id, login, name, email, auth_by, password_hash";

fn user_from_row(row: &Row) -> Result<RegisteredUser, StoreError> {
    Ok(RegisteredUser {
        id: row.try_get("id")?,
        login: row.try_get("login")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        auth_by: row.try_get("auth_by")?,
        password_hash: row.try_get("password_hash")?,
    })
}

pub struct PgUserStore {
    client: Arc<Client>,
}

impl PgUserStore {
    pub fn new(client: Arc<Client>) -> Self { Self { client } }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.client.batch_execute(
            "CREATE TABLE IF NOT EXISTS users (\
                id BIGSERIAL PRIMARY KEY, \
                login TEXT NOT NULL UNIQUE, \
                name TEXT NOT NULL, \
                email TEXT, \
                auth_by TEXT NOT NULL, \
                password_hash TEXT NOT NULL, \
                created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        ).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<RegisteredUser>, StoreError> {
        let q = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        self.client.query_opt(&q, &[&id]).await?.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<RegisteredUser>, StoreError> {
        let q = format!("SELECT {} FROM users WHERE login = $1", USER_COLUMNS);
        self.client.query_opt(&q, &[&login]).await?.as_ref().map(user_from_row).transpose()
    }

    async fn insert(&self, user: NewUser) -> Result<RegisteredUser, StoreError> {
        let q = format!(
            "INSERT INTO users (login, name, email, auth_by, password_hash) VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            USER_COLUMNS
        );
        let params: [&(dyn tokio_postgres::types::ToSql + Sync); 5] =
            [&user.login, &user.name, &user.email, &user.auth_by, &user.password_hash];
        let res = self.client.query_one(&q, &params).await;
        match res {
            Ok(row) => user_from_row(&row),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => Err(StoreError::Duplicate(user.login)),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, id: UserId, patch: UserPatch) -> Result<RegisteredUser, StoreError> {
        let q = format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email), \
             password_hash = COALESCE($4, password_hash) WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        );
        let row = self.client
            .query_opt(&q, &[&id, &patch.name, &patch.email, &patch.password_hash])
            .await?
            .ok_or_else(|| StoreError::Missing(format!("user {}", id)))?;
        user_from_row(&row)
    }
}

fn event_from_row(row: &Row) -> Result<Event, StoreError> {
    Ok(Event {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        kind: row.try_get("kind")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
    })
}

fn chart_from_row(row: &Row) -> Result<Chart, StoreError> {
    Ok(Chart {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        title: row.try_get("title")?,
        spec: row.try_get("spec")?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct PgResourceStore {
    client: Arc<Client>,
}

impl PgResourceStore {
    pub fn new(client: Arc<Client>) -> Self { Self { client } }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.client.batch_execute(
            "CREATE TABLE IF NOT EXISTS events (\
                id BIGSERIAL PRIMARY KEY, owner TEXT NOT NULL, kind TEXT NOT NULL, \
                payload JSONB NOT NULL DEFAULT 'null', created_at TIMESTAMPTZ NOT NULL DEFAULT now()); \
             CREATE INDEX IF NOT EXISTS events_owner_idx ON events (owner, id); \
             CREATE TABLE IF NOT EXISTS charts (\
                id BIGSERIAL PRIMARY KEY, owner TEXT NOT NULL, title TEXT NOT NULL, \
                spec JSONB NOT NULL DEFAULT 'null', created_at TIMESTAMPTZ NOT NULL DEFAULT now()); \
             CREATE INDEX IF NOT EXISTS charts_owner_idx ON charts (owner, id);",
        ).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn list_events(&self, owner: &str) -> Result<Vec<Event>, StoreError> {
        let rows = self.client
            .query("SELECT id, owner, kind, payload, created_at FROM events WHERE owner = $1 ORDER BY id", &[&owner])
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn add_event(&self, owner: &str, event: NewEvent) -> Result<Event, StoreError> {
        let row = self.client
            .query_one(
                "INSERT INTO events (owner, kind, payload) VALUES ($1, $2, $3) RETURNING id, owner, kind, payload, created_at",
                &[&owner, &event.kind, &event.payload],
            )
            .await?;
        event_from_row(&row)
    }

    async fn list_charts(&self, owner: &str) -> Result<Vec<Chart>, StoreError> {
        let rows = self.client
            .query("SELECT id, owner, title, spec, created_at FROM charts WHERE owner = $1 ORDER BY id", &[&owner])
            .await?;
        rows.iter().map(chart_from_row).collect()
    }

    async fn add_chart(&self, owner: &str, chart: NewChart) -> Result<Chart, StoreError> {
        let row = self.client
            .query_one(
                "INSERT INTO charts (owner, title, spec) VALUES ($1, $2, $3) RETURNING id, owner, title, spec, created_at",
                &[&owner, &chart.title, &chart.spec],
            )
            .await?;
        chart_from_row(&row)
    }
}

//! Per-identity resources behind `/events`, `/charts` and `/download`.
//! Every row is owned by the identity's owner key; queries never cross owners.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FieldError, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: i64,
    pub owner: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chart {
    pub id: i64,
    pub owner: String,
    pub title: String,
    pub spec: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChart {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl NewEvent {
    pub fn validate(&self) -> Vec<FieldError> {
        if self.kind.trim().is_empty() { vec![FieldError::new("kind", "Required")] } else { Vec::new() }
    }
}

impl NewChart {
    pub fn validate(&self) -> Vec<FieldError> {
        if self.title.trim().is_empty() { vec![FieldError::new("title", "Required")] } else { Vec::new() }
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Oldest first.
    async fn list_events(&self, owner: &str) -> Result<Vec<Event>, StoreError>;
    async fn add_event(&self, owner: &str, event: NewEvent) -> Result<Event, StoreError>;
    /// Oldest first.
    async fn list_charts(&self, owner: &str) -> Result<Vec<Chart>, StoreError>;
    async fn add_chart(&self, owner: &str, chart: NewChart) -> Result<Chart, StoreError>;
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Render events as CSV with a header row: `id,kind,created_at,payload`.
pub fn events_to_csv(events: &[Event]) -> String {
    let mut out = String::from("id,kind,created_at,payload\n");
    for e in events {
        out.push_str(&format!(
            "{},{},{},{}\n",
            e.id,
            csv_field(&e.kind),
            e.created_at.to_rfc3339(),
            csv_field(&e.payload.to_string()),
        ));
    }
    out
}

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

use veeta::config::Config;
use veeta::error::StoreError;
use veeta::identity::{Session, SessionStore};
use veeta::server::{AppState, router};
use veeta::storage::{Stores, memory::MemorySessionStore};

fn dev_config() -> Config {
    Config::from_lookup(|k| match k {
        "ENV" => Some("development".to_string()),
        "COOKIE_SECRET" => Some("integration-secret".to_string()),
        _ => None,
    })
    .unwrap()
}

fn app_with_store(sessions: Arc<dyn SessionStore>) -> Router {
    let mut stores = Stores::in_memory();
    stores.sessions = sessions;
    router(AppState::new(dev_config(), stores))
}

fn app_with(sessions: Arc<MemorySessionStore>) -> Router { app_with_store(sessions) }

/// Session store whose records can be written but never deleted.
#[derive(Default)]
struct UndeletableSessions(MemorySessionStore);

#[async_trait]
impl SessionStore for UndeletableSessions {
    async fn get(&self, sid: &str) -> Result<Option<Session>, StoreError> { self.0.get(sid).await }

    async fn set(&self, session: &Session) -> Result<(), StoreError> { self.0.set(session).await }

    async fn destroy(&self, sid: &str) -> Result<(), StoreError> {
        Err(StoreError::Missing(format!("cannot delete session {}", sid)))
    }

    async fn touch(&self, sid: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.0.touch(sid, expires_at).await
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> { self.0.prune_expired(now).await }
}

fn app() -> Router { app_with(Arc::new(MemorySessionStore::default())) }

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    bytes: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value { serde_json::from_slice(&self.bytes).unwrap() }

    /// Value of the `session` cookie set by this response, if any. An empty
    /// string means the cookie was cleared.
    fn set_cookie(&self) -> Option<String> {
        self.headers.get_all(header::SET_COOKIE).iter().find_map(|v| {
            let s = v.to_str().ok()?;
            let rest = s.strip_prefix("session=")?;
            Some(rest.split(';').next().unwrap_or("").to_string())
        })
    }
}

/// A browser-like client that keeps the session cookie between requests.
struct Browser {
    app: Router,
    cookie: Option<String>,
}

impl Browser {
    fn new(app: Router) -> Self { Self { app, cookie: None } }

    async fn send(&mut self, method: &str, uri: &str, content_type: Option<&str>, body: String) -> Reply {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(c) = &self.cookie {
            req = req.header(header::COOKIE, format!("session={}", c));
        }
        if let Some(ct) = content_type {
            req = req.header(header::CONTENT_TYPE, ct);
        }
        let resp = self.app.clone().oneshot(req.body(Body::from(body)).unwrap()).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec();
        let reply = Reply { status, headers, bytes };
        match reply.set_cookie() {
            Some(v) if v.is_empty() => self.cookie = None,
            Some(v) => self.cookie = Some(v),
            None => {}
        }
        reply
    }

    async fn get(&mut self, uri: &str) -> Reply { self.send("GET", uri, None, String::new()).await }

    async fn form(&mut self, uri: &str, body: &str) -> Reply {
        self.send("POST", uri, Some("application/x-www-form-urlencoded"), body.to_string()).await
    }

    async fn json(&mut self, uri: &str, body: Value) -> Reply {
        self.send("POST", uri, Some("application/json"), body.to_string()).await
    }

    async fn user(&mut self) -> Value {
        let r = self.get("/user").await;
        assert_eq!(r.status, StatusCode::OK);
        let v = r.json();
        assert_eq!(v["success"], true);
        v["user"].clone()
    }
}

async fn registered(app: &Router, login: &str, password: &str) -> Browser {
    let mut b = Browser::new(app.clone());
    let r = b.form("/register", &format!("login={}&password={}&name=Ada", login, password)).await;
    assert_eq!(r.json()["success"], true, "registration failed: {}", r.json());
    b
}

#[tokio::test]
async fn first_request_gets_guest_and_one_session() {
    let store = Arc::new(MemorySessionStore::default());
    let mut b = Browser::new(app_with(store.clone()));
    let r = b.get("/").await;
    assert_eq!(r.json(), json!({"success": true}));
    assert_eq!(r.headers.get_all(header::SET_COOKIE).iter().count(), 1);
    assert!(b.cookie.as_deref().unwrap().starts_with("s:"));
    assert_eq!(store.len(), 1);

    let user = b.user().await;
    assert_eq!(user["name"], "Guest");
    assert_eq!(user["auth_by"], "guest");
    assert!(user["id"].is_string());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn onboarding_only_on_first_request() {
    let mut b = Browser::new(app());
    let first = b.user().await;
    assert_eq!(first["show_onboarding"], true);
    let second = b.user().await;
    assert!(second.get("show_onboarding").is_none());
}

#[tokio::test]
async fn login_promotes_and_rotates() {
    let app = app();
    let mut owner = registered(&app, "ada", "lovelace1").await;
    owner.get("/logout").await;

    let mut b = Browser::new(app.clone());
    let guest = b.user().await;
    let guest_cookie = b.cookie.clone();

    let r = b.form("/login", "login=ada&password=lovelace1").await;
    assert_eq!(r.status, StatusCode::OK);
    let body = r.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["name"], "Ada");
    assert_eq!(body["user"]["auth_by"], "local");
    assert_ne!(b.cookie, guest_cookie);

    let user = b.user().await;
    assert_eq!(user["id"], body["user"]["id"]);
    assert_eq!(user["name"], "Ada");
    assert_eq!(user["auth_by"], "local");
    assert_ne!(user["id"], guest["id"]);
}

#[tokio::test]
async fn wrong_password_redirects_and_keeps_guest() {
    let app = app();
    registered(&app, "ada", "lovelace1").await;

    let mut b = Browser::new(app);
    let before = b.user().await;
    let cookie = b.cookie.clone();

    let r = b.form("/login", "login=ada&password=not-the-one").await;
    assert_eq!(r.status, StatusCode::SEE_OTHER);
    assert_eq!(r.headers.get(header::LOCATION).unwrap(), "/unauthorized");
    assert!(r.set_cookie().is_none());
    assert_eq!(b.cookie, cookie);

    let after = b.user().await;
    assert_eq!(after["id"], before["id"]);
    assert_eq!(after["auth_by"], "guest");

    let r = b.get("/unauthorized").await;
    assert_eq!(r.json(), json!({"success": false, "errors": ["Unauthorized"]}));
}

#[tokio::test]
async fn unknown_login_is_rejected_like_bad_password() {
    let mut b = Browser::new(app());
    b.get("/").await;
    let r = b.form("/login", "login=nobody&password=whatever1").await;
    assert_eq!(r.status, StatusCode::SEE_OTHER);
    assert_eq!(r.headers.get(header::LOCATION).unwrap(), "/unauthorized");
}

#[tokio::test]
async fn logout_then_fresh_guest_with_onboarding() {
    let store = Arc::new(MemorySessionStore::default());
    let app = app_with(store.clone());
    let mut b = registered(&app, "ada", "lovelace1").await;
    let old_cookie = b.cookie.clone().unwrap();
    let auth_user = b.user().await;
    assert_eq!(auth_user["auth_by"], "local");

    let r = b.get("/logout").await;
    assert_eq!(r.json(), json!({"success": true}));
    assert!(r.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap().contains("Max-Age=0"));
    assert!(b.cookie.is_none());
    assert!(store.is_empty());

    let guest = b.user().await;
    assert_eq!(guest["name"], "Guest");
    assert_eq!(guest["auth_by"], "guest");
    assert_eq!(guest["show_onboarding"], true);
    assert_ne!(b.cookie.as_deref(), Some(old_cookie.as_str()));

    // Replaying the destroyed session's cookie also yields a new guest.
    let mut replay = Browser::new(app);
    replay.cookie = Some(old_cookie.clone());
    let user = replay.user().await;
    assert_eq!(user["auth_by"], "guest");
    assert_ne!(replay.cookie.as_deref(), Some(old_cookie.as_str()));
}

#[tokio::test]
async fn register_then_user_returns_new_identity() {
    let app = app();
    let mut b = Browser::new(app);
    b.get("/").await;
    let guest_cookie = b.cookie.clone();
    let r = b.form("/register", "login=grace&password=hopper-cobol&name=Grace%20Hopper&email=grace%40navy.mil").await;
    let body = r.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["name"], "Grace Hopper");
    assert_ne!(b.cookie, guest_cookie);

    let user = b.user().await;
    assert_eq!(user["id"], body["user"]["id"]);
    assert_eq!(user["name"], "Grace Hopper");
    assert_eq!(user["auth_by"], "local");
}

#[tokio::test]
async fn registration_errors_list_every_field() {
    let app = app();
    registered(&app, "taken", "password1").await;

    let mut b = Browser::new(app);
    let r = b.form("/register", "login=taken&password=short&email=bad").await;
    let body = r.json();
    assert_eq!(body["success"], false);
    let fields: Vec<&str> = body["errors"].as_array().unwrap().iter().map(|e| e["field"].as_str().unwrap()).collect();
    assert!(fields.contains(&"login"));
    assert!(fields.contains(&"password"));
    assert!(fields.contains(&"email"));
    assert!(body["errors"].as_array().unwrap().iter().any(|e| e["message"] == "Login already taken"));
    assert_eq!(b.user().await["auth_by"], "guest");
}

#[tokio::test]
async fn tampered_cookie_yields_new_guest() {
    let mut b = Browser::new(app());
    let first_view = b.user().await;
    let good = b.cookie.clone().unwrap();
    // Swap the first character of the signed id; the signature no longer matches.
    let swapped = if good[2..].starts_with('0') { "1" } else { "0" };
    let bad = format!("s:{}{}", swapped, &good[3..]);
    b.cookie = Some(bad);

    let user = b.user().await;
    assert_ne!(user["id"], first_view["id"]);
    assert_eq!(user["show_onboarding"], true);
    assert_ne!(b.cookie.as_deref(), Some(good.as_str()));
}

#[tokio::test]
async fn expired_session_is_ignored_and_removed() {
    let store = Arc::new(MemorySessionStore::default());
    let mut b = Browser::new(app_with(store.clone()));
    let first_view = b.user().await;
    let sid = first_view["id"].as_str().unwrap().to_string();

    let mut sess = store.get(&sid).await.unwrap().unwrap();
    sess.expires_at = Utc::now() - Duration::seconds(1);
    store.set(&sess).await.unwrap();

    let user = b.user().await;
    assert_ne!(user["id"], first_view["id"]);
    assert!(store.get(&sid).await.unwrap().is_none());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn profile_update_requires_registration() {
    let app = app();
    let mut guest = Browser::new(app.clone());
    let r = guest.json("/profile/update", json!({"name": "Someone"})).await;
    assert_eq!(r.json(), json!({"success": false, "errors": ["Unauthorized"]}));

    let mut b = registered(&app, "ada", "lovelace1").await;
    let r = b.json("/profile/update", json!({"name": "Countess", "password": "engine-notes"})).await;
    let body = r.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["name"], "Countess");
    assert_eq!(b.user().await["name"], "Countess");

    b.get("/logout").await;
    let r = b.form("/login", "login=ada&password=engine-notes").await;
    assert_eq!(r.json()["success"], true);
}

#[tokio::test]
async fn events_and_charts_are_scoped_per_identity() {
    let app = app();
    let mut a = Browser::new(app.clone());
    let mut c = registered(&app, "ada", "lovelace1").await;

    let r = a.json("/events", json!({"kind": "meal", "payload": {"kcal": 420}})).await;
    assert_eq!(r.json()["success"], true);
    assert_eq!(r.json()["event"]["kind"], "meal");
    c.json("/events", json!({"kind": "walk", "payload": {"km": 3}})).await;
    c.json("/charts", json!({"title": "weight", "spec": {"type": "line"}})).await;

    let mine = a.get("/events").await.json();
    assert_eq!(mine["events"].as_array().unwrap().len(), 1);
    assert_eq!(mine["events"][0]["kind"], "meal");
    assert_eq!(a.get("/charts").await.json()["charts"], json!([]));

    let theirs = c.get("/charts").await.json();
    assert_eq!(theirs["charts"].as_array().unwrap().len(), 1);
    assert_eq!(theirs["charts"][0]["title"], "weight");

    let r = a.json("/events", json!({"payload": {}})).await;
    assert_eq!(r.json()["success"], false);
    assert_eq!(r.json()["errors"][0]["field"], "kind");
}

#[tokio::test]
async fn download_exports_caller_events_as_csv() {
    let mut b = Browser::new(app());
    b.json("/events", json!({"kind": "meal", "payload": {"kcal": 420}})).await;
    let r = b.get("/download").await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.headers.get(header::CONTENT_TYPE).unwrap().to_str().unwrap().starts_with("text/csv"));
    assert!(r.headers.get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap().contains("attachment"));
    let text = String::from_utf8(r.bytes).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("id,kind,created_at,payload"));
    assert!(lines.next().unwrap().contains("meal"));
}

#[tokio::test]
async fn malformed_json_is_a_client_error() {
    let mut b = Browser::new(app());
    let r = b.send("POST", "/events", Some("application/json"), "{not json".to_string()).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(r.json()["success"], false);
    assert!(r.json()["errors"][0].is_string());
}

#[tokio::test]
async fn onboarding_survives_until_user_is_fetched() {
    let mut b = Browser::new(app());
    b.get("/").await;
    b.json("/events", json!({"kind": "meal", "payload": {}})).await;
    let first = b.user().await;
    assert_eq!(first["show_onboarding"], true);
    assert!(b.user().await.get("show_onboarding").is_none());
}

#[tokio::test]
async fn onboarding_carries_across_registration() {
    let app = app();
    let mut b = Browser::new(app);
    b.get("/").await;
    b.form("/register", "login=grace&password=hopper-cobol").await;
    let user = b.user().await;
    assert_eq!(user["auth_by"], "local");
    assert_eq!(user["show_onboarding"], true);
}

#[tokio::test]
async fn failed_logout_reports_false_and_keeps_session() {
    let mut b = Browser::new(app_with_store(Arc::new(UndeletableSessions::default())));
    let before = b.user().await;
    let cookie = b.cookie.clone();

    let r = b.get("/logout").await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.json(), json!({"success": false}));
    assert!(r.headers.get(header::SET_COOKIE).is_none());
    assert_eq!(b.cookie, cookie);

    let after = b.user().await;
    assert_eq!(after["id"], before["id"]);
}

#[tokio::test]
async fn bad_form_bodies_get_json_errors() {
    let mut b = Browser::new(app());
    let r = b.send("POST", "/login", Some("application/json"), "{}".to_string()).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(r.json()["success"], false);
    assert!(r.json()["errors"][0].is_string());

    let r = b.send("POST", "/register", None, "login=ada".to_string()).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(r.json()["success"], false);
}

//!
//! veeta HTTP server
//! -----------------
//! Axum router for the veeta API.
//!
//! Responsibilities:
//! - Session middleware: every request is bound to a session (minted on first
//!   visit) and resolved to exactly one identity before any handler runs.
//! - Signed `session` cookie issue, re-issue on rotation/refresh, and clearing on logout.
//! - Login/logout/register/profile endpoints backed by the `identity` lifecycle.
//! - Per-identity resource endpoints (events, charts, CSV download).
//! - Development-only CORS and a background sweeper for expired sessions.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::identity::{
    CookieAction, IdentityResolver, LocalStrategy, RequestContext, SessionLifecycle, SessionManager, SharedContext,
};
use crate::resources::ResourceStore;
use crate::security;
use crate::storage::Stores;

pub mod auth;
pub mod resources;

pub const SESSION_COOKIE: &str = "session";

/// Shared server state injected into all handlers.
///
/// Every store handle arrives through here; nothing in the request path reaches
/// for a global.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lifecycle: SessionLifecycle,
    pub resolver: IdentityResolver,
    pub resources: Arc<dyn ResourceStore>,
}

impl AppState {
    pub fn new(config: Config, stores: Stores) -> Self {
        let sessions = SessionManager::new(stores.sessions, config.session_ttl());
        let strategy = Arc::new(LocalStrategy::new(stores.users.clone()));
        Self {
            lifecycle: SessionLifecycle::new(sessions, stores.users.clone(), strategy),
            resolver: IdentityResolver::new(stores.users),
            resources: stores.resources,
            config: Arc::new(config),
        }
    }

    pub fn sessions(&self) -> &SessionManager { self.lifecycle.sessions() }
}

/// Build the full router, session middleware included.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(auth::index))
        .route("/login", post(auth::login))
        .route("/logout", get(auth::logout))
        .route("/unauthorized", get(auth::unauthorized))
        .route("/register", post(auth::register))
        .route("/profile/update", post(auth::update_profile))
        .route("/user", get(auth::current_user))
        .route("/events", get(resources::get_events).post(resources::post_events))
        .route("/charts", get(resources::get_charts).post(resources::post_charts))
        .route("/download", get(resources::download))
        .layer(middleware::from_fn_with_state(state.clone(), session_layer))
        .layer(TraceLayer::new_for_http());
    if let Some(cors) = cors_layer(&state.config) {
        app = app.layer(cors);
    }
    app.with_state(state)
}

fn cors_layer(config: &Config) -> Option<CorsLayer> {
    if !config.is_development() {
        // TODO: allow the production frontend origin once its domain is fixed.
        return None;
    }
    let origin = match HeaderValue::from_str(&config.dev_origin) {
        Ok(o) => o,
        Err(e) => {
            warn!(target: "startup", "invalid DEV_ORIGIN '{}': {}; CORS disabled", config.dev_origin, e);
            return None;
        }
    };
    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::ORIGIN,
                HeaderName::from_static("x-requested-with"),
                header::CONTENT_TYPE,
                header::ACCEPT,
            ]),
    )
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(header::COOKIE) {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k == name { return Some(v.to_string()); }
            }
        }
    }
    None
}

fn set_session_cookie(config: &Config, sid: &str) -> AppResult<HeaderValue> {
    let value = security::sign_cookie(config.cookie_secret.as_bytes(), sid)?;
    let secure = if config.is_development() { "" } else { "; Secure" };
    let max_age = config.session_ttl().num_seconds();
    HeaderValue::from_str(&format!("{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax{}", SESSION_COOKIE, value, max_age, secure))
        .map_err(|e| AppError::internal("cookie_header", e.to_string()))
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("session=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Path=/; HttpOnly; SameSite=Lax")
}

/// Bind the request to a live session and resolve its identity. The session is
/// persisted before the handler runs if resolution changed it.
async fn attach_session(state: &AppState, headers: &HeaderMap) -> AppResult<RequestContext> {
    let sessions = state.sessions();
    let sid = parse_cookie(headers, SESSION_COOKIE)
        .and_then(|v| security::unsign_cookie(state.config.cookie_secret.as_bytes(), &v));
    let existing = match sid.as_deref() {
        Some(sid) => sessions.load(sid).await?,
        None => None,
    };
    let (mut session, is_new) = match existing {
        Some(s) => (s, false),
        None => (sessions.issue(), true),
    };
    let refresh = !is_new && sessions.needs_refresh(&session);
    if refresh {
        sessions.touch(&mut session).await?;
    }

    let mut ctx = state.resolver.resolve(session, is_new).await?;
    if refresh {
        ctx.cookie = CookieAction::Set;
    }
    if ctx.dirty {
        if let Some(s) = &ctx.session { sessions.save(s).await?; }
        ctx.dirty = false;
    }
    Ok(ctx)
}

async fn session_layer(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let ctx = match attach_session(&state, req.headers()).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(target: "session", "session resolution failed: {}", e);
            return e.into_response();
        }
    };
    let shared: SharedContext = Arc::new(Mutex::new(ctx));
    req.extensions_mut().insert(shared.clone());

    let mut resp = next.run(req).await;

    let mut ctx = shared.lock().await;
    if ctx.dirty {
        if let Some(s) = &ctx.session {
            if let Err(e) = state.sessions().save(s).await {
                error!(target: "session", sid = %s.id, "session save failed: {}", e);
            }
        }
        ctx.dirty = false;
    }
    match (ctx.cookie, ctx.session.as_ref()) {
        (CookieAction::Set, Some(s)) => match set_session_cookie(&state.config, &s.id) {
            Ok(v) => { resp.headers_mut().append(header::SET_COOKIE, v); }
            Err(e) => error!(target: "session", "could not build session cookie: {}", e),
        },
        (CookieAction::Clear, _) => { resp.headers_mut().append(header::SET_COOKIE, clear_session_cookie()); }
        _ => {}
    }
    resp
}

/// Periodically drop expired session records.
fn spawn_session_sweeper(sessions: SessionManager, every: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            match sessions.prune_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(target: "session", removed, "session_sweep"),
                Err(e) => warn!(target: "session", "session sweep failed: {}", e),
            }
        }
    });
}

/// Start the veeta HTTP server with the given configuration.
///
/// Uses the Postgres stores when `DATABASE_URL` is set, in-memory stores otherwise.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let stores = match config.database_url.as_deref() {
        Some(url) => Stores::postgres(url, &config.session_table).await?,
        None => {
            warn!(target: "startup", "DATABASE_URL not set; using in-memory stores (data is lost on restart)");
            Stores::in_memory()
        }
    };
    let port = config.port;
    let sweep = Duration::from_secs(config.session_sweep_secs.max(1));
    let state = AppState::new(config, stores);
    spawn_session_sweeper(state.sessions().clone(), sweep);

    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!(target: "startup", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!(target: "startup", "Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => { s.recv().await; }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

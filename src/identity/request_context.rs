use std::sync::Arc;

use tokio::sync::Mutex;

use super::principal::Identity;
use super::session::Session;

/// What the response should do with the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CookieAction {
    #[default]
    Keep,
    /// Issue (or re-issue) the cookie for the current session id.
    Set,
    /// Expire the cookie; the session is gone.
    Clear,
}

/// Per-request session state shared between the session middleware and handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// `None` once the session has been destroyed by logout.
    pub session: Option<Session>,
    pub identity: Identity,
    /// One-shot onboarding flag for the first request of a session.
    pub show_onboarding: bool,
    pub cookie: CookieAction,
    /// Session data changed and must be written back.
    pub dirty: bool,
}

impl RequestContext {
    pub fn session_id(&self) -> Option<&str> { self.session.as_ref().map(|s| s.id.as_str()) }
}

pub type SharedContext = Arc<Mutex<RequestContext>>;

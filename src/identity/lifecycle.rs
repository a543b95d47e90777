use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::principal::{Identity, RegisteredUser, UserId};
use super::provider::{AuthStrategy, CredentialCheck, LoginRequest};
use super::request_context::{CookieAction, RequestContext};
use super::session::{SessionData, SessionManager};
use crate::error::{AppError, AppResult};
use crate::users::{self, ProfileUpdate, RegistrationForm, UserStore};

/// `{id, name, auth_by}` as returned by `/login` and `/register`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub auth_by: String,
}

impl From<&RegisteredUser> for UserSummary {
    fn from(u: &RegisteredUser) -> Self {
        Self { id: u.id, name: u.name.clone(), auth_by: u.auth_by.clone() }
    }
}

/// Guests are identified by their session id, registered users by their row id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CurrentUserId {
    User(UserId),
    Session(String),
}

/// Merged view returned by `/user`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CurrentUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<CurrentUserId>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_onboarding: Option<bool>,
}

/// Drives the session state machine: guest, authenticated, destroyed.
#[derive(Clone)]
pub struct SessionLifecycle {
    sessions: SessionManager,
    users: Arc<dyn UserStore>,
    strategy: Arc<dyn AuthStrategy>,
}

impl SessionLifecycle {
    pub fn new(sessions: SessionManager, users: Arc<dyn UserStore>, strategy: Arc<dyn AuthStrategy>) -> Self {
        Self { sessions, users, strategy }
    }

    pub fn sessions(&self) -> &SessionManager { &self.sessions }

    /// Verify credentials and, on success, attach the user to the session.
    /// A rejection leaves the session untouched.
    pub async fn authenticate(&self, ctx: &mut RequestContext, req: &LoginRequest) -> AppResult<RegisteredUser> {
        match self.strategy.authenticate(&req.login, &req.password).await? {
            CredentialCheck::Accepted(user) => {
                self.login(ctx, user.clone(), self.strategy.name()).await?;
                Ok(user)
            }
            CredentialCheck::Rejected(reason) => Err(AppError::AuthRejected { reason }),
        }
    }

    /// Promote the session to `user`. The id is rotated and the data replaced
    /// wholesale, so nothing from the guest phase carries over except the
    /// onboarding marker.
    pub async fn login(&self, ctx: &mut RequestContext, user: RegisteredUser, auth_by: &str) -> AppResult<()> {
        let Some(session) = ctx.session.as_mut() else {
            return Err(AppError::internal("no_session", "login without an active session"));
        };
        session.data = SessionData {
            user_id: Some(user.id),
            auth_by: Some(auth_by.to_string()),
            first_request: session.data.first_request,
            extra: Default::default(),
        };
        self.sessions.rotate(session).await?;
        info!(target: "auth", user_id = user.id, sid = %session.id, auth_by, "session.login");
        ctx.identity = Identity::Registered(user);
        ctx.cookie = CookieAction::Set;
        ctx.dirty = false;
        Ok(())
    }

    /// Destroy the session record. The next request starts over as a new guest.
    pub async fn logout(&self, ctx: &mut RequestContext) -> AppResult<()> {
        let Some(session) = ctx.session.take() else { return Ok(()); };
        if let Err(e) = self.sessions.destroy(&session.id).await {
            warn!(target: "session", sid = %session.id, "session destroy failed: {}", e);
            ctx.session = Some(session);
            return Err(AppError::SessionDestroyFailed { message: e.to_string() });
        }
        info!(target: "auth", sid = %session.id, "session.logout");
        ctx.identity = Identity::Guest { session_id: session.id };
        ctx.cookie = CookieAction::Clear;
        ctx.dirty = false;
        Ok(())
    }

    /// Create the user, then log the session in as them.
    pub async fn register(&self, ctx: &mut RequestContext, form: &RegistrationForm) -> AppResult<RegisteredUser> {
        let user = users::register_user(self.users.as_ref(), form, self.strategy.name()).await?;
        self.login(ctx, user.clone(), self.strategy.name()).await?;
        Ok(user)
    }

    /// Guest defaults overlaid, field by field, with whatever the registered identity has.
    pub fn current_user(&self, ctx: &RequestContext) -> CurrentUser {
        let data = ctx.session.as_ref().map(|s| &s.data);
        let mut view = CurrentUser {
            id: match (data.and_then(|d| d.user_id), ctx.session_id()) {
                (Some(uid), _) => Some(CurrentUserId::User(uid)),
                (None, Some(sid)) => Some(CurrentUserId::Session(sid.to_string())),
                (None, None) => None,
            },
            name: "Guest".to_string(),
            auth_by: data.and_then(|d| d.auth_by.clone()),
            show_onboarding: ctx.show_onboarding.then_some(true),
        };
        if let Identity::Registered(user) = &ctx.identity {
            view.id = Some(CurrentUserId::User(user.id));
            view.name = user.name.clone();
            view.auth_by = Some(user.auth_by.clone());
        }
        view
    }

    /// Record that onboarding has been shown; the marker is persisted with the session.
    pub fn mark_onboarding_seen(&self, ctx: &mut RequestContext) {
        if !ctx.show_onboarding { return; }
        if let Some(session) = ctx.session.as_mut() {
            session.data.first_request = Some(false);
            ctx.show_onboarding = false;
            ctx.dirty = true;
        }
    }

    pub async fn update_profile(&self, ctx: &mut RequestContext, update: &ProfileUpdate) -> AppResult<RegisteredUser> {
        let Identity::Registered(current) = &ctx.identity else { return Err(AppError::Unauthorized); };
        let user = users::update_profile(self.users.as_ref(), current.id, update).await?;
        ctx.identity = Identity::Registered(user.clone());
        Ok(user)
    }
}

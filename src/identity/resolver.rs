use std::sync::Arc;

use tracing::{debug, warn};

use super::principal::{Identity, GUEST_AUTH_BY};
use super::request_context::{CookieAction, RequestContext};
use super::session::Session;
use crate::error::AppResult;
use crate::users::UserStore;

/// Turns the current session into exactly one identity, fresh every request.
#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserStore>,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserStore>) -> Self { Self { users } }

    /// Resolve `session`. `is_new` marks a session minted for this request, which
    /// must be handed to the client as a cookie.
    pub async fn resolve(&self, mut session: Session, is_new: bool) -> AppResult<RequestContext> {
        let mut dirty = false;

        // Cleared only once `/user` has shown it.
        let show_onboarding = session.data.first_request.is_none();

        let registered = match session.data.user_id {
            Some(uid) => {
                let found = self.users.find_by_id(uid).await?;
                if found.is_none() {
                    warn!(target: "session", sid = %session.id, user_id = uid, "session points at a missing user; demoting to guest");
                }
                found
            }
            None => None,
        };

        let identity = match registered {
            Some(user) => Identity::Registered(user),
            None => {
                if session.data.user_id.take().is_some() || session.data.auth_by.as_deref() != Some(GUEST_AUTH_BY) {
                    session.data.auth_by = Some(GUEST_AUTH_BY.to_string());
                    dirty = true;
                }
                Identity::Guest { session_id: session.id.clone() }
            }
        };

        debug!(target: "session", sid = %session.id, guest = identity.is_guest(), is_new, "identity.resolve");
        Ok(RequestContext {
            session: Some(session),
            identity,
            show_onboarding,
            cookie: if is_new { CookieAction::Set } else { CookieAction::Keep },
            dirty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionManager;
    use crate::storage::memory::{MemorySessionStore, MemoryUserStore};
    use crate::users::{register_user, RegistrationForm};

    fn fixtures() -> (SessionManager, Arc<MemoryUserStore>, IdentityResolver) {
        let users = Arc::new(MemoryUserStore::default());
        let sm = SessionManager::new(Arc::new(MemorySessionStore::default()), chrono::Duration::days(1));
        let resolver = IdentityResolver::new(users.clone());
        (sm, users, resolver)
    }

    #[tokio::test]
    async fn onboarding_persists_until_marker_is_set() {
        let (sm, _users, r) = fixtures();
        let ctx = r.resolve(sm.issue(), true).await.unwrap();
        assert!(ctx.identity.is_guest());
        assert!(ctx.show_onboarding);
        assert!(ctx.dirty);
        assert_eq!(ctx.cookie, CookieAction::Set);

        let sess = ctx.session.unwrap();
        assert_eq!(sess.data.auth_by.as_deref(), Some(GUEST_AUTH_BY));
        assert_eq!(sess.data.first_request, None);
        let again = r.resolve(sess, false).await.unwrap();
        assert!(again.show_onboarding);
        assert!(!again.dirty);
        assert_eq!(again.cookie, CookieAction::Keep);

        let mut sess = again.session.unwrap();
        sess.data.first_request = Some(false);
        let seen = r.resolve(sess, false).await.unwrap();
        assert!(!seen.show_onboarding);
    }

    #[tokio::test]
    async fn stored_user_resolves_registered() {
        let (sm, users, r) = fixtures();
        let form = RegistrationForm { login: "linus".into(), password: "penguins!".into(), ..Default::default() };
        let user = register_user(users.as_ref(), &form, "local").await.unwrap();
        let mut s = sm.issue();
        s.data.user_id = Some(user.id);
        s.data.auth_by = Some("local".into());
        s.data.first_request = Some(false);
        let ctx = r.resolve(s, false).await.unwrap();
        assert_eq!(ctx.identity.registered().map(|u| u.id), Some(user.id));
        assert!(!ctx.dirty);
    }

    #[tokio::test]
    async fn missing_user_demotes_to_guest() {
        let (sm, _users, r) = fixtures();
        let mut s = sm.issue();
        s.data.user_id = Some(404);
        s.data.auth_by = Some("local".into());
        s.data.first_request = Some(false);
        let ctx = r.resolve(s, false).await.unwrap();
        assert!(ctx.identity.is_guest());
        assert!(ctx.dirty);
        let sess = ctx.session.unwrap();
        assert_eq!(sess.data.user_id, None);
        assert_eq!(sess.data.auth_by.as_deref(), Some(GUEST_AUTH_BY));
    }
}

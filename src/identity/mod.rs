//! Session and identity lifecycle: guest bootstrapping, credential checks,
//! login/logout/registration, and the per-request identity handed to handlers.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod resolver;
mod lifecycle;
mod request_context;

pub use principal::{Identity, RegisteredUser, UserId, GUEST_AUTH_BY};
pub use session::{Session, SessionData, SessionId, SessionManager, SessionStore};
pub use provider::{AuthStrategy, CredentialCheck, LocalStrategy, LoginRequest};
pub use resolver::IdentityResolver;
pub use lifecycle::{CurrentUser, CurrentUserId, SessionLifecycle, UserSummary};
pub use request_context::{CookieAction, RequestContext, SharedContext};

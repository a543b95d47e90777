use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::principal::RegisteredUser;
use crate::error::{AppError, AppResult, RejectionReason};
use crate::users::UserStore;

/// Form posted to `/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
}

/// Outcome of a credential check; never partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCheck {
    Accepted(RegisteredUser),
    Rejected(RejectionReason),
}

/// Pluggable credential verification. Implementations never touch the session;
/// attaching the accepted user is the lifecycle controller's job.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Recorded as `auth_by` on sessions this strategy authenticates.
    fn name(&self) -> &str;
    async fn authenticate(&self, login: &str, password: &str) -> AppResult<CredentialCheck>;
}

/// Login/password checked against argon2 hashes in the user store.
pub struct LocalStrategy {
    users: Arc<dyn UserStore>,
}

impl LocalStrategy {
    pub const NAME: &'static str = "local";

    pub fn new(users: Arc<dyn UserStore>) -> Self { Self { users } }
}

#[async_trait]
impl AuthStrategy for LocalStrategy {
    fn name(&self) -> &str { Self::NAME }

    async fn authenticate(&self, login: &str, password: &str) -> AppResult<CredentialCheck> {
        let found = self.users.find_by_login(login).await?;
        let password = password.to_string();
        // argon2 is CPU-bound; keep it off the async workers.
        let check = tokio::task::spawn_blocking(move || match found {
            None => {
                crate::security::verify_dummy(&password);
                CredentialCheck::Rejected(RejectionReason::NotFound)
            }
            Some(user) => {
                if crate::security::verify_password(&user.password_hash, &password) {
                    CredentialCheck::Accepted(user)
                } else {
                    CredentialCheck::Rejected(RejectionReason::BadPassword)
                }
            }
        })
        .await
        .map_err(|e| AppError::internal("auth_task", e.to_string()))?;
        if let CredentialCheck::Rejected(reason) = &check {
            debug!(target: "auth", login = %login, ?reason, "auth.rejected");
        }
        Ok(check)
    }
}

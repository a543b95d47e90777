//! User rows: the store seam plus the registration and profile-update routines
//! that validate input, hash passwords and write through the store.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::error::{AppError, AppResult, FieldError, StoreError};
use crate::identity::{RegisteredUser, UserId};
use crate::security;

const LOGIN_MIN: usize = 3;
const LOGIN_MAX: usize = 64;
const PASSWORD_MIN: usize = 8;
const NAME_MAX: usize = 100;

/// Row to insert; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub name: String,
    pub email: Option<String>,
    pub auth_by: String,
    pub password_hash: String,
}

/// Partial update applied to an existing row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<RegisteredUser>, StoreError>;
    /// Case-sensitive exact match on login.
    async fn find_by_login(&self, login: &str) -> Result<Option<RegisteredUser>, StoreError>;
    /// Fails with `StoreError::Duplicate` when the login is taken.
    async fn insert(&self, user: NewUser) -> Result<RegisteredUser, StoreError>;
    async fn update(&self, id: UserId, patch: UserPatch) -> Result<RegisteredUser, StoreError>;
}

/// Form posted to `/register`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationForm {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// JSON body posted to `/profile/update`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn check_login(login: &str, errors: &mut Vec<FieldError>) {
    if login.is_empty() {
        errors.push(FieldError::new("login", "Required"));
        return;
    }
    let len = login.chars().count();
    if !(LOGIN_MIN..=LOGIN_MAX).contains(&len) {
        errors.push(FieldError::new("login", format!("Must be between {} and {} characters", LOGIN_MIN, LOGIN_MAX)));
    }
    if !login.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-')) {
        errors.push(FieldError::new("login", "May only contain letters, digits and _ . @ -"));
    }
}

fn check_password(password: &str, errors: &mut Vec<FieldError>) {
    if password.is_empty() {
        errors.push(FieldError::new("password", "Required"));
    } else if password.chars().count() < PASSWORD_MIN {
        errors.push(FieldError::new("password", format!("Must be at least {} characters", PASSWORD_MIN)));
    }
}

fn check_name(name: &str, errors: &mut Vec<FieldError>) {
    if name.chars().count() > NAME_MAX {
        errors.push(FieldError::new("name", format!("Must be at most {} characters", NAME_MAX)));
    }
}

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    let ok = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !ok {
        errors.push(FieldError::new("email", "Invalid email address"));
    }
}

/// argon2 is CPU-bound; hash on the blocking pool like credential checks do.
async fn hash_off_runtime(password: &str) -> AppResult<String> {
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || security::hash_password(&password))
        .await
        .map_err(|e| AppError::internal("hash_task", e.to_string()))??;
    Ok(hash)
}

/// Validate every field of a registration form, collecting all failures.
pub fn validate_registration(form: &RegistrationForm) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_login(form.login.trim(), &mut errors);
    check_password(&form.password, &mut errors);
    if let Some(name) = non_blank(&form.name) { check_name(name, &mut errors); }
    if let Some(email) = non_blank(&form.email) { check_email(email, &mut errors); }
    errors
}

/// Create a user from a registration form. Validation and uniqueness failures come
/// back as `AppError::ValidationFailed` with every offending field listed.
pub async fn register_user(users: &dyn UserStore, form: &RegistrationForm, auth_by: &str) -> AppResult<RegisteredUser> {
    let mut errors = validate_registration(form);
    let login = form.login.trim();
    if !login.is_empty() && users.find_by_login(login).await?.is_some() {
        errors.push(FieldError::new("login", "Login already taken"));
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let new = NewUser {
        login: login.to_string(),
        name: non_blank(&form.name).unwrap_or(login).to_string(),
        email: non_blank(&form.email).map(str::to_string),
        auth_by: auth_by.to_string(),
        password_hash: hash_off_runtime(&form.password).await?,
    };
    let user = match users.insert(new).await {
        Ok(u) => u,
        // Lost a race with a concurrent registration of the same login.
        Err(StoreError::Duplicate(_)) => {
            return Err(AppError::validation(vec![FieldError::new("login", "Login already taken")]));
        }
        Err(e) => return Err(e.into()),
    };
    info!(target: "auth", user_id = user.id, login = %user.login, "user.register");
    Ok(user)
}

/// Apply a profile update for an existing user.
pub async fn update_profile(users: &dyn UserStore, id: UserId, update: &ProfileUpdate) -> AppResult<RegisteredUser> {
    let mut errors = Vec::new();
    let name = non_blank(&update.name);
    let email = non_blank(&update.email);
    if let Some(n) = name { check_name(n, &mut errors); }
    if let Some(e) = email { check_email(e, &mut errors); }
    if let Some(p) = update.password.as_deref() { check_password(p, &mut errors); }
    if name.is_none() && email.is_none() && update.password.is_none() && errors.is_empty() {
        errors.push(FieldError::new("profile", "Nothing to update"));
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let password_hash = match update.password.as_deref() {
        Some(p) => Some(hash_off_runtime(p).await?),
        None => None,
    };
    let patch = UserPatch {
        name: name.map(str::to_string),
        email: email.map(str::to_string),
        password_hash,
    };
    let user = users.update(id, patch).await?;
    info!(target: "auth", user_id = id, "user.profile_update");
    Ok(user)
}

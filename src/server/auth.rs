//! Session lifecycle endpoints: login, logout, registration, profile and current user.
//! Failures surface as `{success:false, ...}` bodies; clients branch on `success`.

use axum::{
    Extension, Form, Json,
    extract::{State, rejection::{FormRejection, JsonRejection}},
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;
use tracing::debug;

use super::AppState;
use crate::error::AppError;
use crate::identity::{LoginRequest, SharedContext, UserSummary};
use crate::users::{ProfileUpdate, RegistrationForm};

/// Unwrap a form body, turning axum's rejection into a `{success:false}` reply.
fn form_body<T>(payload: Result<Form<T>, FormRejection>) -> Result<T, AppError> {
    payload.map(|Form(v)| v).map_err(|e| AppError::user("bad_form", e.body_text()))
}

pub async fn index() -> impl IntoResponse {
    Json(json!({ "success": true }))
}

pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<SharedContext>,
    payload: Result<Form<LoginRequest>, FormRejection>,
) -> Response {
    let req = match form_body(payload) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    let mut ctx = ctx.lock().await;
    match state.lifecycle.authenticate(&mut ctx, &req).await {
        Ok(user) => Json(json!({ "success": true, "user": UserSummary::from(&user) })).into_response(),
        Err(AppError::AuthRejected { reason }) => {
            debug!(target: "auth", ?reason, "login rejected; redirecting");
            Redirect::to("/unauthorized").into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn logout(State(state): State<AppState>, Extension(ctx): Extension<SharedContext>) -> Response {
    let mut ctx = ctx.lock().await;
    let success = state.lifecycle.logout(&mut ctx).await.is_ok();
    Json(json!({ "success": success })).into_response()
}

pub async fn unauthorized() -> Response {
    AppError::Unauthorized.into_response()
}

pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<SharedContext>,
    payload: Result<Form<RegistrationForm>, FormRejection>,
) -> Response {
    let form = match form_body(payload) {
        Ok(f) => f,
        Err(e) => return e.into_response(),
    };
    let mut ctx = ctx.lock().await;
    match state.lifecycle.register(&mut ctx, &form).await {
        Ok(user) => Json(json!({ "success": true, "user": UserSummary::from(&user) })).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<SharedContext>,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Response {
    let update = match super::resources::json_body(payload) {
        Ok(u) => u,
        Err(e) => return e.into_response(),
    };
    let mut ctx = ctx.lock().await;
    match state.lifecycle.update_profile(&mut ctx, &update).await {
        Ok(user) => Json(json!({ "success": true, "user": UserSummary::from(&user) })).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn current_user(State(state): State<AppState>, Extension(ctx): Extension<SharedContext>) -> Response {
    let mut ctx = ctx.lock().await;
    let user = state.lifecycle.current_user(&ctx);
    state.lifecycle.mark_onboarding_seen(&mut ctx);
    Json(json!({ "success": true, "user": user })).into_response()
}

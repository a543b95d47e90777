//! Events, charts and the CSV export, all scoped to the caller's identity.

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::header,
    response::IntoResponse,
};
use serde_json::{Value, json};

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::identity::SharedContext;
use crate::resources::{NewChart, NewEvent, events_to_csv};

/// Unwrap a JSON body, turning axum's rejection into a `{success:false}` reply.
pub(super) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload.map(|Json(v)| v).map_err(|e| AppError::user("bad_json", e.body_text()))
}

async fn owner_of(ctx: &SharedContext) -> String {
    ctx.lock().await.identity.owner_key()
}

pub async fn get_events(State(state): State<AppState>, Extension(ctx): Extension<SharedContext>) -> AppResult<Json<Value>> {
    let owner = owner_of(&ctx).await;
    let events = state.resources.list_events(&owner).await?;
    Ok(Json(json!({ "success": true, "events": events })))
}

pub async fn post_events(
    State(state): State<AppState>,
    Extension(ctx): Extension<SharedContext>,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let event = json_body(payload)?;
    let errors = event.validate();
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }
    let owner = owner_of(&ctx).await;
    let event = state.resources.add_event(&owner, event).await?;
    Ok(Json(json!({ "success": true, "event": event })))
}

pub async fn get_charts(State(state): State<AppState>, Extension(ctx): Extension<SharedContext>) -> AppResult<Json<Value>> {
    let owner = owner_of(&ctx).await;
    let charts = state.resources.list_charts(&owner).await?;
    Ok(Json(json!({ "success": true, "charts": charts })))
}

pub async fn post_charts(
    State(state): State<AppState>,
    Extension(ctx): Extension<SharedContext>,
    payload: Result<Json<NewChart>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let chart = json_body(payload)?;
    let errors = chart.validate();
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }
    let owner = owner_of(&ctx).await;
    let chart = state.resources.add_chart(&owner, chart).await?;
    Ok(Json(json!({ "success": true, "chart": chart })))
}

pub async fn download(
    State(state): State<AppState>,
    Extension(ctx): Extension<SharedContext>,
) -> AppResult<impl IntoResponse> {
    let owner = owner_of(&ctx).await;
    let events = state.resources.list_events(&owner).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"events.csv\""),
        ],
        events_to_csv(&events),
    ))
}

use axum::extract::{Path, State};
use serde_json::json;

use super::parse_task_id;
use crate::{
    error::ApiResult,
    response::{created, success},
    routes::AppState,
};

pub async fn list_dead_letters(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.scheduler.dead_letters().await))
}

pub async fn get_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task_id = parse_task_id(&id)?;
    Ok(success(state.scheduler.dead_letter(task_id).await?))
}

/// 以新任务重放死信
pub async fn replay_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task_id = parse_task_id(&id)?;
    let new_id = state.scheduler.replay(task_id).await?;
    Ok(created(json!({ "task_id": new_id, "replayed_from": task_id })))
}

pub async fn discard_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task_id = parse_task_id(&id)?;
    Ok(success(state.scheduler.discard(task_id).await?))
}

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use taskqueue_core::{SchedulerError, Tier};
use taskqueue_dispatcher::{CancelOutcome, SubmitRequest};

use super::parse_task_id;
use crate::{
    error::{ApiError, ApiResult},
    response::{accepted, created, success},
    routes::AppState,
};

/// 任务提交请求
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_type: String,
    /// UTF-8文本负载，对调度器不透明
    #[serde(default)]
    pub payload: String,
    /// 必须是整数，超出 [1,5] 时被钳制
    pub priority: serde_json::Value,
    pub deadline: Option<DateTime<Utc>>,
}

/// 提交任务
pub async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<SubmitTaskRequest>,
) -> ApiResult<axum::response::Response> {
    let priority = request.priority.as_i64().ok_or_else(|| {
        SchedulerError::Validation(format!("优先级必须是整数: {}", request.priority))
    })?;

    let submit = SubmitRequest {
        task_type: request.task_type,
        payload: request.payload.into_bytes(),
        priority,
        deadline: request.deadline,
    };
    let task_id = state.scheduler.submit(submit).await?;

    let (tier, _) = Tier::clamp_from(priority);
    state.metrics.record_task_submitted(tier.level());
    Ok(axum::response::IntoResponse::into_response(created(json!({
        "task_id": task_id,
        "tier": tier,
    }))))
}

/// 获取任务当前状态与转换历史
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task_id = parse_task_id(&id)?;
    let history = state.scheduler.task_history(task_id).await?;
    let Some(last) = history.last() else {
        return Err(ApiError::Scheduler(SchedulerError::TaskNotFound { id: task_id }));
    };

    Ok(success(json!({
        "task_id": task_id,
        "status": last.to,
        "attempt": last.attempt,
        "delivery": last.delivery,
        "history": history,
    })))
}

/// 取消任务
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<axum::response::Response> {
    let task_id = parse_task_id(&id)?;
    let outcome = state.scheduler.cancel(task_id).await?;
    let body = json!({ "task_id": task_id, "outcome": outcome });

    let response = match outcome {
        CancelOutcome::DeadLettered => axum::response::IntoResponse::into_response(success(body)),
        CancelOutcome::Cancelling => axum::response::IntoResponse::into_response(accepted(
            body,
            "任务正在执行，已标记为取消中",
        )),
    };
    Ok(response)
}

use axum::extract::State;

use crate::{error::ApiResult, response::success, routes::AppState};

/// 获取各层级的监控快照
pub async fn get_monitoring(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let snapshot = state.scheduler.monitoring_snapshot().await;
    state.metrics.update_snapshot(&snapshot);
    Ok(success(snapshot))
}

/// 获取Worker记录（含保留期内的失效Worker）
pub async fn list_workers(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut workers = state.scheduler.health().records().await;
    workers.sort_by_key(|w| w.id);
    Ok(success(workers))
}

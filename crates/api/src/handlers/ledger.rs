use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use taskqueue_core::{LedgerFilter, TaskStatus};

use super::parse_task_id;
use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// 账本查询参数，`status` 为逗号分隔的目标状态
#[derive(Debug, Default, Deserialize)]
pub struct LedgerQueryParams {
    pub task_id: Option<String>,
    pub status: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl LedgerQueryParams {
    fn into_filter(self) -> Result<LedgerFilter, ApiError> {
        let task_id = self.task_id.as_deref().map(parse_task_id).transpose()?;
        let statuses = match self.status.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().parse::<TaskStatus>().map_err(ApiError::BadRequest))
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(LedgerFilter {
            task_id,
            statuses,
            since: self.since,
            until: self.until,
            limit: self.limit,
        })
    }
}

/// 只读查询状态转换账本
pub async fn query_ledger(
    State(state): State<AppState>,
    Query(params): Query<LedgerQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let filter = params.into_filter()?;
    Ok(success(state.scheduler.query_ledger(&filter).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_list_parsing() {
        let params = LedgerQueryParams {
            status: Some("completed, dead_lettered".into()),
            limit: Some(10),
            ..Default::default()
        };
        let filter = params.into_filter().unwrap();
        assert_eq!(
            filter.statuses,
            vec![TaskStatus::Completed, TaskStatus::DeadLettered]
        );
        assert_eq!(filter.limit, Some(10));

        let bad = LedgerQueryParams {
            status: Some("running".into()),
            ..Default::default()
        };
        assert!(matches!(bad.into_filter(), Err(ApiError::BadRequest(_))));
    }
}

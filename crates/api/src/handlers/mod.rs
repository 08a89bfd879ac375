pub mod dead_letters;
pub mod health;
pub mod ledger;
pub mod metrics;
pub mod monitoring;
pub mod tasks;

use taskqueue_core::TaskId;

use crate::error::{ApiError, ApiResult};

pub(crate) fn parse_task_id(raw: &str) -> ApiResult<TaskId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("无效的任务ID: {raw}")))
}

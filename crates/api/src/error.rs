use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use taskqueue_core::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Scheduler(SchedulerError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            ApiError::Scheduler(SchedulerError::TaskNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "TASK_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::DeadLetterNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "DEAD_LETTER_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::WorkerNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "WORKER_NOT_FOUND")
            }
            ApiError::Scheduler(SchedulerError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION")
            }
            ApiError::Scheduler(SchedulerError::TaskBusy { .. }) => {
                (StatusCode::CONFLICT, "TASK_BUSY")
            }
            ApiError::Scheduler(SchedulerError::LedgerWriteConflict { .. }) => {
                (StatusCode::CONFLICT, "LEDGER_WRITE_CONFLICT")
            }
            ApiError::Scheduler(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        let message = match &self {
            ApiError::Scheduler(SchedulerError::Validation(msg)) => msg.clone(),
            ApiError::Scheduler(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("请求处理失败: {}", e);
                "系统内部错误".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

use thiserror::Error;

use crate::models::{TaskId, TaskStatus, WorkerId};

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// 提交内容不合法，任务不会入队，也不会重试
    #[error("提交校验失败: {0}")]
    Validation(String),

    #[error("任务执行出现可重试错误: {0}")]
    TransientExecution(String),

    #[error("任务执行出现致命错误: {0}")]
    FatalExecution(String),

    #[error("任务 {task_id} 的租约在Worker {worker_id} 上超时")]
    WorkerTimeout { task_id: TaskId, worker_id: WorkerId },

    #[error("任务 {task_id} 的账本写入冲突，已重试 {attempts} 次")]
    LedgerWriteConflict { task_id: TaskId, attempts: u32 },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: TaskId },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: WorkerId },

    #[error("任务 {task_id} 没有有效租约")]
    LeaseNotFound { task_id: TaskId },

    /// 任务正处于出队与派发之间，稍后重试即可
    #[error("任务 {id} 正在派发中，请稍后重试")]
    TaskBusy { id: TaskId },

    #[error("死信条目未找到: {id}")]
    DeadLetterNotFound { id: TaskId },

    #[error("非法状态转换: {task_id} {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否属于调用方输入错误
    pub fn is_validation(&self) -> bool {
        matches!(self, SchedulerError::Validation(_))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

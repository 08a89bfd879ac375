use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Task, WorkerId};

/// 进入死信的原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// 重试预算耗尽
    RetriesExhausted { last_error: String },
    /// 执行器返回致命错误
    Fatal { error: String },
    /// 在多个不同Worker上反复租约超时
    RepeatedTimeouts { workers: Vec<WorkerId> },
    /// 被操作员取消
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::RetriesExhausted { last_error } => {
                write!(f, "重试次数耗尽: {last_error}")
            }
            FailureReason::Fatal { error } => write!(f, "致命错误: {error}"),
            FailureReason::RepeatedTimeouts { workers } => {
                write!(f, "在 {} 个不同Worker上租约超时", workers.len())
            }
            FailureReason::Cancelled => f.write_str("已取消"),
        }
    }
}

/// 死信条目，创建后不再修改，直到操作员重放或丢弃
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: Task,
    pub failure_reason: FailureReason,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(task: Task, failure_reason: FailureReason, now: DateTime<Utc>) -> Self {
        Self {
            task,
            failure_reason,
            dead_lettered_at: now,
        }
    }
}

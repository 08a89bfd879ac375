use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FailureReason, TaskId, Tier};
use crate::SchedulerResult;

/// 任务生命周期事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum LifecycleEvent {
    #[serde(rename = "task.completed")]
    TaskCompleted {
        task_id: TaskId,
        task_type: String,
        tier: Tier,
        attempt_count: u32,
        at: DateTime<Utc>,
    },
    #[serde(rename = "task.dead_lettered")]
    TaskDeadLettered {
        task_id: TaskId,
        task_type: String,
        tier: Tier,
        reason: FailureReason,
        at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::TaskCompleted { .. } => "task.completed",
            LifecycleEvent::TaskDeadLettered { .. } => "task.dead_lettered",
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            LifecycleEvent::TaskCompleted { task_id, .. }
            | LifecycleEvent::TaskDeadLettered { task_id, .. } => *task_id,
        }
    }
}

/// 通知接收端
///
/// 投递是尽力而为的，失败只记录日志，不影响任务状态。
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &LifecycleEvent) -> SchedulerResult<()>;
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Tier, WorkerId};

/// 任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 任务状态
///
/// 状态机：`pending -> leased -> completed`，`leased -> pending`（租约过期或可重试失败），
/// `pending/leased -> dead_lettered`。`completed` 与 `dead_lettered` 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Leased,
    Completed,
    DeadLettered,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Leased => "leased",
            TaskStatus::Completed => "completed",
            TaskStatus::DeadLettered => "dead_lettered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::DeadLettered)
    }

    /// 检查状态转换是否合法
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Leased)
                | (Pending, DeadLettered)
                | (Leased, Completed)
                | (Leased, Pending)
                | (Leased, DeadLettered)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "leased" => Ok(TaskStatus::Leased),
            "completed" => Ok(TaskStatus::Completed),
            "dead_lettered" => Ok(TaskStatus::DeadLettered),
            other => Err(format!("未知的任务状态: {other}")),
        }
    }
}

/// 任务
///
/// 从提交开始到进入终态为止都由调度器持有。`payload` 对调度核心是不透明的字节。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub payload: Vec<u8>,
    pub tier: Tier,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// 已消耗的重试预算（执行失败计数）
    pub attempt_count: u32,
    /// 已被派发（加租约）的次数，租约过期也会累加
    pub delivery_count: u32,
    pub status: TaskStatus,
    /// 曾经在其上租约超时的不同Worker
    #[serde(default)]
    pub timed_out_workers: Vec<WorkerId>,
    /// 由哪条死信重放而来
    #[serde(default)]
    pub replayed_from: Option<TaskId>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>, tier: Tier) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            payload,
            tier,
            deadline: None,
            created_at: Utc::now(),
            attempt_count: 0,
            delivery_count: 0,
            status: TaskStatus::Pending,
            timed_out_workers: Vec::new(),
            replayed_from: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 记录一次租约超时，返回涉及的不同Worker数量
    pub fn record_timeout(&mut self, worker_id: WorkerId) -> usize {
        if !self.timed_out_workers.contains(&worker_id) {
            self.timed_out_workers.push(worker_id);
        }
        self.timed_out_workers.len()
    }

    /// 等待时长（秒）
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Leased));
        assert!(Leased.can_transition_to(Completed));
        assert!(Leased.can_transition_to(Pending));
        assert!(Pending.can_transition_to(DeadLettered));
        assert!(Leased.can_transition_to(DeadLettered));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!DeadLettered.can_transition_to(Pending));
        assert!(!Leased.can_transition_to(Leased));
    }

    #[test]
    fn test_status_round_trip_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Leased,
            TaskStatus::Completed,
            TaskStatus::DeadLettered,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("running".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_record_timeout_counts_distinct_workers() {
        let mut task = Task::new("noop", vec![], Tier::CRITICAL);
        assert_eq!(task.record_timeout(WorkerId::new(1)), 1);
        assert_eq!(task.record_timeout(WorkerId::new(1)), 1);
        assert_eq!(task.record_timeout(WorkerId::new(2)), 2);
    }
}

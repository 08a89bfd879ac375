use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskStatus, WorkerId};

/// 账本中的一条状态转换记录
///
/// `version` 为该任务的单调版本号，从1开始；写入时需与存储中的当前版本匹配。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub task_id: TaskId,
    pub version: u64,
    /// None 表示任务刚被提交
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
    pub attempt: u32,
    pub delivery: u32,
    pub worker_id: Option<WorkerId>,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Transition {
    /// 去重键：同一次尝试、同一次派发、同一目标状态只会被应用一次
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.task_id, self.attempt, self.delivery, self.to
        )
    }
}

/// 任务在账本中的最新位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHead {
    pub version: u64,
    pub status: TaskStatus,
}

/// 账本查询条件，所有字段均为可选
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub task_id: Option<TaskId>,
    /// 按目标状态过滤
    #[serde(default)]
    pub statuses: Vec<TaskStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl LedgerFilter {
    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// 判断记录是否满足条件（不考虑limit）
    pub fn matches(&self, transition: &Transition) -> bool {
        if let Some(task_id) = self.task_id {
            if transition.task_id != task_id {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&transition.to) {
            return false;
        }
        if let Some(since) = self.since {
            if transition.recorded_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if transition.recorded_at > until {
                return false;
            }
        }
        true
    }
}

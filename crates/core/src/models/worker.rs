use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, Tier};

/// Worker的稳定标识，系统其他部分只通过它引用Worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy,
    Dead,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
            WorkerState::Dead => "dead",
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self, WorkerState::Dead)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker记录，创建于spawn，销毁于terminate或失效清理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub tier: Tier,
    pub last_heartbeat: DateTime<Utc>,
    pub state: WorkerState,
    pub spawned_at: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(id: WorkerId, tier: Tier, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tier,
            last_heartbeat: now,
            state: WorkerState::Idle,
            spawned_at: now,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        (now - self.last_heartbeat).num_milliseconds() > timeout_seconds * 1000
    }
}

/// Worker池事件，供监控订阅
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    WorkerSpawned { worker_id: WorkerId, tier: Tier },
    WorkerTerminated { worker_id: WorkerId, tier: Tier },
    WorkerDeclaredDead { worker_id: WorkerId, tier: Tier },
    LeaseRevoked {
        task_id: TaskId,
        worker_id: WorkerId,
        tier: Tier,
    },
}

impl PoolEvent {
    pub fn tier(&self) -> Tier {
        match self {
            PoolEvent::WorkerSpawned { tier, .. }
            | PoolEvent::WorkerTerminated { tier, .. }
            | PoolEvent::WorkerDeclaredDead { tier, .. }
            | PoolEvent::LeaseRevoked { tier, .. } => *tier,
        }
    }
}

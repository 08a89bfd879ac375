use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, WorkerId};

/// 租约：一个Worker对一个任务的限时独占
///
/// 同一时刻每个任务至多存在一个有效租约。`generation` 在每次派发时递增，
/// 用于拒绝已被撤销租约的迟到完成信号。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub generation: u32,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl_ms: i64,
}

impl Lease {
    pub fn new(
        task_id: TaskId,
        worker_id: WorkerId,
        generation: u32,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            task_id,
            worker_id,
            generation,
            granted_at: now,
            expires_at: now + ttl,
            ttl_ms: ttl.num_milliseconds(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// 续约，从 `now` 起再延长一个TTL
    pub fn renew(&mut self, now: DateTime<Utc>) {
        self.expires_at = now + Duration::milliseconds(self.ttl_ms);
    }

    /// 判断完成信号是否来自当前租约持有者
    pub fn is_held_by(&self, worker_id: WorkerId, generation: u32) -> bool {
        self.worker_id == worker_id && self.generation == generation
    }
}

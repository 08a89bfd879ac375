use serde::{Deserialize, Serialize};

use super::Tier;

/// 单个层级队列的指标，供扩缩容与监控使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// 可立即派发的待处理任务数
    pub backlog_depth: usize,
    /// 处于退避等待中的任务数
    pub delayed_count: usize,
    /// 最早待处理任务的等待时长（秒）
    pub oldest_pending_age_seconds: Option<i64>,
    /// 队首任务的优先级分数
    pub head_score: Option<i64>,
}

/// Worker数量统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub idle: usize,
    pub busy: usize,
    pub dead: usize,
}

impl WorkerCounts {
    /// 存活Worker数，失效Worker不计入
    pub fn active(&self) -> usize {
        self.idle + self.busy
    }
}

/// 单个层级的监控快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSnapshot {
    pub tier: Tier,
    pub name: String,
    pub sla_hours: u32,
    pub queue: QueueMetrics,
    pub workers: WorkerCounts,
    pub active_leases: usize,
    /// 最早待处理任务已超过SLA
    pub sla_breached: bool,
}

/// 只读监控面
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    pub tiers: Vec<TierSnapshot>,
    pub dead_letter_count: usize,
}

impl MonitoringSnapshot {
    pub fn total_backlog(&self) -> usize {
        self.tiers.iter().map(|t| t.queue.backlog_depth).sum()
    }

    pub fn total_workers(&self) -> WorkerCounts {
        self.tiers.iter().fold(WorkerCounts::default(), |acc, t| WorkerCounts {
            idle: acc.idle + t.workers.idle,
            busy: acc.busy + t.workers.busy,
            dead: acc.dead + t.workers.dead,
        })
    }
}

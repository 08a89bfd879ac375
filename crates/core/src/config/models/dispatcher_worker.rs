use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::Tier;

/// 单个层级的扩缩容参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierScalingConfig {
    pub tier: Tier,
    pub min_workers: usize,
    pub max_workers: usize,
    /// 每个Worker承担的积压任务数阈值
    pub tasks_per_worker_threshold: usize,
}

impl TierScalingConfig {
    pub fn new(tier: Tier, min_workers: usize, max_workers: usize, threshold: usize) -> Self {
        Self {
            tier,
            min_workers,
            max_workers,
            tasks_per_worker_threshold: threshold,
        }
    }
}

/// 任务类型级别的执行参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTypeConfig {
    pub expected_execution_seconds: u64,
}

/// Worker池配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub scale_interval_seconds: u64,
    pub cooldown_seconds: i64,
    pub lease_check_interval_ms: u64,
    pub idle_poll_interval_ms: u64,
    /// 本层级为空时是否从其他层级取任务
    pub work_stealing: bool,
    pub default_expected_execution_seconds: u64,
    /// 租约TTL = 预期执行时间 × 该倍数
    pub lease_ttl_multiplier: u32,
    pub shutdown_grace_seconds: u64,
    pub task_types: HashMap<String, TaskTypeConfig>,
    pub tiers: Vec<TierScalingConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            scale_interval_seconds: 30,
            cooldown_seconds: 60,
            lease_check_interval_ms: 1_000,
            idle_poll_interval_ms: 500,
            work_stealing: true,
            default_expected_execution_seconds: 30,
            lease_ttl_multiplier: 2,
            shutdown_grace_seconds: 30,
            task_types: HashMap::new(),
            tiers: Tier::all()
                .zip([(1, 8, 5), (1, 6, 10), (1, 4, 10), (0, 2, 20), (0, 2, 50)])
                .map(|(tier, (min, max, threshold))| TierScalingConfig::new(tier, min, max, threshold))
                .collect(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scale_interval_seconds == 0 {
            return Err(anyhow::anyhow!("扩缩容间隔必须大于0"));
        }
        if self.cooldown_seconds < 0 {
            return Err(anyhow::anyhow!("冷却时间不能为负数"));
        }
        if self.lease_check_interval_ms == 0 || self.idle_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }
        if self.default_expected_execution_seconds == 0 {
            return Err(anyhow::anyhow!("预期执行时间必须大于0"));
        }
        if self.lease_ttl_multiplier == 0 {
            return Err(anyhow::anyhow!("租约TTL倍数必须大于0"));
        }
        for (task_type, cfg) in &self.task_types {
            if cfg.expected_execution_seconds == 0 {
                return Err(anyhow::anyhow!("任务类型 {} 的预期执行时间必须大于0", task_type));
            }
        }
        for tier in &self.tiers {
            if tier.min_workers > tier.max_workers {
                return Err(anyhow::anyhow!(
                    "层级 {} 的最小Worker数不能大于最大Worker数",
                    tier.tier.level()
                ));
            }
            if tier.tasks_per_worker_threshold == 0 {
                return Err(anyhow::anyhow!(
                    "层级 {} 的单Worker任务阈值必须大于0",
                    tier.tier.level()
                ));
            }
        }
        Ok(())
    }

    /// 获取层级的扩缩容参数，未配置的层级不自动扩容
    pub fn scaling_for(&self, tier: Tier) -> TierScalingConfig {
        self.tiers
            .iter()
            .find(|t| t.tier == tier)
            .cloned()
            .unwrap_or_else(|| TierScalingConfig::new(tier, 0, 0, 1))
    }

    /// 计算任务类型的租约TTL（毫秒）
    pub fn lease_ttl_ms(&self, task_type: &str) -> i64 {
        let expected = self
            .task_types
            .get(task_type)
            .map(|c| c.expected_execution_seconds)
            .unwrap_or(self.default_expected_execution_seconds);
        (expected * self.lease_ttl_multiplier as u64 * 1000) as i64
    }
}

/// Worker心跳与失效检测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Worker发送心跳的期望间隔
    pub heartbeat_interval_ms: u64,
    /// 连续缺失多少次心跳判定为失效
    pub missed_heartbeats_threshold: u32,
    pub sweep_interval_ms: u64,
    /// 失效Worker记录保留时长，超时后被清理
    pub dead_worker_retention_seconds: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            missed_heartbeats_threshold: 3,
            sweep_interval_ms: 10_000,
            dead_worker_retention_seconds: 300,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }
        if self.missed_heartbeats_threshold == 0 {
            return Err(anyhow::anyhow!("心跳缺失阈值必须大于0"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(anyhow::anyhow!("失效检测间隔必须大于0"));
        }
        if self.dead_worker_retention_seconds < 0 {
            return Err(anyhow::anyhow!("失效Worker保留时长不能为负数"));
        }
        Ok(())
    }

    /// 心跳超时时长（毫秒）
    pub fn heartbeat_timeout_ms(&self) -> i64 {
        self.heartbeat_interval_ms as i64 * self.missed_heartbeats_threshold as i64
    }
}

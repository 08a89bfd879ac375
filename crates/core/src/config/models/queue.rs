use serde::{Deserialize, Serialize};

use crate::models::{QueueTier, Tier};

/// 队列层级配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub tiers: Vec<QueueTier>,
    /// 单个任务负载的最大字节数
    pub max_payload_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tiers: QueueTier::defaults(),
            max_payload_bytes: 1024 * 1024,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for tier in Tier::all() {
            let count = self.tiers.iter().filter(|t| t.level == tier).count();
            if count != 1 {
                return Err(anyhow::anyhow!("层级 {} 必须且只能配置一次", tier.level()));
            }
        }
        if self.tiers.iter().any(|t| t.name.is_empty()) {
            return Err(anyhow::anyhow!("层级名称不能为空"));
        }
        if self.max_payload_bytes == 0 {
            return Err(anyhow::anyhow!("负载大小上限必须大于0"));
        }
        Ok(())
    }

    pub fn tier(&self, tier: Tier) -> Option<&QueueTier> {
        self.tiers.iter().find(|t| t.level == tier)
    }
}

use serde::{Deserialize, Serialize};

/// 优先级分数计算参数
///
/// 分数越小越先被派发。层级权重按 `tier_weight_step` 递增，
/// 等待时长与截止时间临近都会降低分数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub tier_weight_step: i64,
    pub age_step_seconds: i64,
    pub age_bonus_per_step: i64,
    pub max_age_bonus: i64,
    pub urgency_window_seconds: i64,
    pub max_urgency_bonus: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            tier_weight_step: 10_000,
            age_step_seconds: 60,
            age_bonus_per_step: 10,
            max_age_bonus: 2_000,
            urgency_window_seconds: 3_600,
            max_urgency_bonus: 2_000,
        }
    }
}

impl SchedulingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tier_weight_step <= 0 {
            return Err(anyhow::anyhow!("层级权重步长必须大于0"));
        }
        if self.age_step_seconds <= 0 {
            return Err(anyhow::anyhow!("等待加成的时间步长必须大于0"));
        }
        if self.urgency_window_seconds <= 0 {
            return Err(anyhow::anyhow!("紧急窗口必须大于0"));
        }
        if self.age_bonus_per_step < 0 || self.max_age_bonus < 0 || self.max_urgency_bonus < 0 {
            return Err(anyhow::anyhow!("加成值不能为负数"));
        }
        Ok(())
    }
}

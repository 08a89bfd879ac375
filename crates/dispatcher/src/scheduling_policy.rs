use chrono::{DateTime, Duration, Utc};

use taskqueue_core::{config::SchedulingConfig, Task, Tier};

/// 优先级分数计算
///
/// `priority_score = tier_weight(tier) - age_bonus(now - created_at) - urgency_bonus(deadline - now)`
///
/// 纯函数，无副作用。分数越小越先被派发；所有加成按整数步长量化，
/// 同一层级中同时提交且无截止时间的任务分数相同，由创建时间决定先后。
#[derive(Debug, Clone)]
pub struct SchedulingPolicy {
    config: SchedulingConfig,
}

impl SchedulingPolicy {
    pub fn new(config: SchedulingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub fn tier_weight(&self, tier: Tier) -> i64 {
        tier.level() as i64 * self.config.tier_weight_step
    }

    /// 等待越久加成越大，按 `age_step_seconds` 量化并封顶
    pub fn age_bonus(&self, age: Duration) -> i64 {
        let seconds = age.num_seconds();
        if seconds <= 0 {
            return 0;
        }
        let steps = seconds / self.config.age_step_seconds;
        steps
            .saturating_mul(self.config.age_bonus_per_step)
            .min(self.config.max_age_bonus)
    }

    /// 距离截止时间越近加成越大；已过期取最大值，无截止时间为0
    pub fn urgency_bonus(&self, remaining: Option<Duration>) -> i64 {
        let Some(remaining) = remaining else {
            return 0;
        };
        let window = self.config.urgency_window_seconds;
        let remaining = remaining.num_seconds();
        if remaining <= 0 {
            return self.config.max_urgency_bonus;
        }
        if remaining >= window {
            return 0;
        }
        self.config.max_urgency_bonus * (window - remaining) / window
    }

    pub fn priority_score(&self, task: &Task, now: DateTime<Utc>) -> i64 {
        self.tier_weight(task.tier)
            - self.age_bonus(now - task.created_at)
            - self.urgency_bonus(task.deadline.map(|deadline| deadline - now))
    }
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self::new(SchedulingConfig::default())
    }
}

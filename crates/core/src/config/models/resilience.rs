use serde::{Deserialize, Serialize};

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// 抖动比例，取值 [0, 1)
    pub jitter_ratio: f64,
    /// 同一任务在多少个不同Worker上租约超时后视为致命
    pub timeout_fatal_after_distinct_workers: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            jitter_ratio: 0.1,
            timeout_fatal_after_distinct_workers: 3,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_delay_ms == 0 {
            return Err(anyhow::anyhow!("基础重试间隔必须大于0"));
        }
        if self.backoff_factor < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(anyhow::anyhow!("抖动比例必须在[0, 1)之间"));
        }
        // 保证相邻两次重试间隔不递减
        if self.backoff_factor < 1.0 + self.jitter_ratio {
            return Err(anyhow::anyhow!("退避倍数不能小于 1 + 抖动比例"));
        }
        if self.timeout_fatal_after_distinct_workers == 0 {
            return Err(anyhow::anyhow!("超时致命阈值必须大于0"));
        }
        Ok(())
    }
}

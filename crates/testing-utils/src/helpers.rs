//! Test helper utilities and common testing patterns

use std::time::Duration;

use taskqueue_core::config::{AppConfig, TierScalingConfig};
use taskqueue_core::Tier;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        Self::wait_for_with_interval(condition, timeout, Duration::from_millis(10)).await
    }

    /// Wait for a condition with a custom poll interval
    pub async fn wait_for_with_interval<F, Fut>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(poll_interval).await;
        }

        condition().await
    }
}

/// Configuration with millisecond-scale intervals for integration tests
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pool.lease_check_interval_ms = 20;
    config.pool.idle_poll_interval_ms = 10;
    config.pool.scale_interval_seconds = 1;
    config.pool.shutdown_grace_seconds = 2;
    config.health.heartbeat_interval_ms = 20;
    config.health.missed_heartbeats_threshold = 3;
    config.health.sweep_interval_ms = 20;
    config.retry.base_delay_ms = 5;
    config.retry.max_delay_ms = 40;
    config.observability.metrics_enabled = false;
    config.api.enabled = false;
    config
}

/// Exactly `workers` workers on tier 1 and none elsewhere
pub fn single_tier_config(workers: usize) -> AppConfig {
    let mut config = fast_config();
    config.pool.tiers = Tier::all()
        .map(|tier| {
            let count = if tier == Tier::CRITICAL { workers } else { 0 };
            TierScalingConfig::new(tier, count, count, 10)
        })
        .collect();
    config.pool.work_stealing = true;
    config
}

use crate::config::models::{AppConfig, LedgerBackend, TierScalingConfig};
use crate::models::Tier;

#[test]
fn test_invalid_retry_config() {
    let mut config = AppConfig::default();
    config.retry.jitter_ratio = 1.0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.retry.max_delay_ms = 10;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.retry.backoff_factor = 1.05;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_pool_config() {
    let mut config = AppConfig::default();
    config.pool.tiers = vec![TierScalingConfig::new(Tier::CRITICAL, 5, 2, 10)];
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.pool.tiers = vec![TierScalingConfig::new(Tier::CRITICAL, 1, 2, 0)];
    assert!(config.validate().is_err());
}

#[test]
fn test_missing_tier_rejected() {
    let mut config = AppConfig::default();
    config.queue.tiers.pop();
    assert!(config.validate().is_err());
}

#[test]
fn test_sqlite_ledger_requires_sqlite_url() {
    let mut config = AppConfig::default();
    config.ledger.backend = LedgerBackend::Sqlite;
    config.ledger.url = "postgresql://localhost/ledger".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_observability_config() {
    let mut config = AppConfig::default();
    config.observability.log_format = "xml".to_string();
    assert!(config.validate().is_err());
}

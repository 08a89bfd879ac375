pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod dispatcher_worker;
pub mod queue;
pub mod resilience;
pub mod scheduling;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::{LedgerBackend, LedgerConfig};
pub use dispatcher_worker::{HealthConfig, PoolConfig, TaskTypeConfig, TierScalingConfig};
pub use queue::QueueConfig;
pub use resilience::RetryConfig;
pub use scheduling::SchedulingConfig;

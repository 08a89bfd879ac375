//! 调度核心
//!
//! 各组件只通过自身的方法访问其拥有的状态：
//! - [`PriorityQueueRouter`] 拥有每个层级的待处理队列
//! - [`WorkerPoolManager`] 拥有Worker句柄与租约表
//! - [`HealthMonitor`] 拥有Worker存活状态
//! - [`RetryCoordinator`] 拥有死信条目
//! - [`TaskLedger`] 是任务状态的唯一事实来源
//!
//! [`TaskScheduler`] 把它们组装在一起，对外提供提交、取消、死信操作与监控。

pub mod health_monitor;
pub mod ledger;
pub mod pool_manager;
pub mod retry_coordinator;
pub mod router;
pub mod scheduler;
pub mod scheduling_policy;
pub mod worker_runtime;

pub use health_monitor::HealthMonitor;
pub use ledger::{AppendOutcome, TaskLedger, TransitionRequest};
pub use pool_manager::{LeaseGrant, ScaleDecision, WorkerPoolManager};
pub use taskqueue_core::models::PoolEvent;
pub use retry_coordinator::{FailureOutcome, RetryCoordinator};
pub use router::PriorityQueueRouter;
pub use scheduler::{CancelOutcome, SubmitRequest, TaskScheduler};
pub use scheduling_policy::SchedulingPolicy;

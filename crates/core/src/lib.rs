//! 任务队列核心库
//!
//! 定义数据模型、错误分类、配置以及调度核心与外部协作者之间的接口。
//! 调度逻辑本身位于 `taskqueue-dispatcher`。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::*;
pub use models::{
    DeadLetterEntry, FailureReason, Lease, LedgerFilter, LedgerHead, MonitoringSnapshot,
    QueueMetrics, QueueTier, Task, TaskId, TaskStatus, Tier, TierSnapshot, Transition,
    WorkerCounts, WorkerId, WorkerRecord, WorkerState,
};
pub use traits::{
    DefaultErrorClassifier, ErrorClass, ErrorClassifier, ExecutionContext, ExecutionError,
    ExecutorRegistry, LedgerAppendError, LedgerStore, LifecycleEvent, NotificationSink,
    TaskExecutor, TaskOutput,
};

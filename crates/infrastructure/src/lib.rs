//! 任务队列基础设施
//!
//! 账本存储引擎（内存、SQLite）、生命周期通知接收端以及指标导出。

pub mod database;
pub mod notification;
pub mod observability;

pub use database::{create_ledger_store, InMemoryLedgerStore, SqliteLedgerStore};
pub use notification::{BroadcastNotificationSink, TracingNotificationSink};
pub use observability::{install_prometheus_recorder, MetricsCollector};

pub mod ledger_store;
pub mod notification;
pub mod task_executor;

pub use ledger_store::{LedgerAppendError, LedgerStore};
pub use notification::{LifecycleEvent, NotificationSink};
pub use task_executor::{
    DefaultErrorClassifier, ErrorClass, ErrorClassifier, ExecutionContext, ExecutionError,
    ExecutorRegistry, TaskExecutor, TaskOutput,
};

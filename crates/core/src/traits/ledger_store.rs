//! 账本存储接口
//!
//! 存储实现只需保证两件事：同一任务的版本号严格递增（乐观并发），
//! 以及去重键唯一。具体引擎（SQL、KV、内存）对调度核心透明。

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{LedgerFilter, LedgerHead, TaskId, Transition};
use crate::{SchedulerError, SchedulerResult};

/// 追加写入失败的原因
#[derive(Debug, Error)]
pub enum LedgerAppendError {
    /// 版本号不匹配，说明有并发写入
    #[error("版本冲突: 期望写入版本 {expected}，当前版本 {actual}")]
    Conflict { expected: u64, actual: u64 },

    /// 去重键已存在，该转换已被应用过
    #[error("重复的状态转换: {key}")]
    Duplicate { key: String },

    #[error(transparent)]
    Store(#[from] SchedulerError),
}

/// 可插拔的账本存储
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// 读取任务当前的版本与状态
    async fn head(&self, task_id: TaskId) -> SchedulerResult<Option<LedgerHead>>;

    /// 追加一条转换记录
    ///
    /// `transition.version` 必须等于当前版本加一（新任务为1）。
    async fn append(&self, transition: &Transition) -> Result<(), LedgerAppendError>;

    /// 去重键是否已存在
    async fn contains(&self, dedup_key: &str) -> SchedulerResult<bool>;

    /// 只读查询，按记录时间升序返回
    async fn query(&self, filter: &LedgerFilter) -> SchedulerResult<Vec<Transition>>;

    /// 存储名称，用于日志
    fn name(&self) -> &str;
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use taskqueue_core::{
    models::{LedgerFilter, LedgerHead, TaskId, TaskStatus, Transition, WorkerId},
    traits::{LedgerAppendError, LedgerStore},
    SchedulerError, SchedulerResult, Task,
};

/// 一次状态转换请求，版本号由 [`TaskLedger`] 读取后填入
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub task_id: TaskId,
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
    pub attempt: u32,
    pub delivery: u32,
    pub worker_id: Option<WorkerId>,
    pub reason: Option<String>,
}

impl TransitionRequest {
    /// 以任务当前计数构造从 `task.status` 到 `to` 的转换
    pub fn for_task(task: &Task, to: TaskStatus) -> Self {
        Self {
            task_id: task.id,
            from: Some(task.status),
            to,
            attempt: task.attempt_count,
            delivery: task.delivery_count,
            worker_id: None,
            reason: None,
        }
    }

    /// 新任务提交
    pub fn submitted(task: &Task) -> Self {
        Self {
            from: None,
            ..Self::for_task(task, TaskStatus::Pending)
        }
    }

    pub fn by_worker(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn into_transition(self, version: u64, recorded_at: DateTime<Utc>) -> Transition {
        Transition {
            task_id: self.task_id,
            version,
            from: self.from,
            to: self.to,
            attempt: self.attempt,
            delivery: self.delivery,
            worker_id: self.worker_id,
            reason: self.reason,
            recorded_at,
        }
    }
}

/// 追加结果
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Applied(Transition),
    /// 同一转换已被应用过，本次为空操作
    Duplicate,
}

impl AppendOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, AppendOutcome::Applied(_))
    }
}

/// 任务状态转换账本
///
/// 只追加。每次写入先读取当前版本，再以 `version + 1` 写入；
/// 遇到版本冲突时重新读取并重试，超过上限后返回 [`SchedulerError::LedgerWriteConflict`]。
pub struct TaskLedger {
    store: Arc<dyn LedgerStore>,
    max_conflict_retries: u32,
}

impl TaskLedger {
    pub fn new(store: Arc<dyn LedgerStore>, max_conflict_retries: u32) -> Self {
        Self {
            store,
            max_conflict_retries,
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub async fn head(&self, task_id: TaskId) -> SchedulerResult<Option<LedgerHead>> {
        self.store.head(task_id).await
    }

    pub async fn append(
        &self,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> SchedulerResult<AppendOutcome> {
        let task_id = request.task_id;
        let mut conflicts = 0u32;

        loop {
            let head = self.store.head(task_id).await?;
            let current = head.map(|h| h.status);
            let version = head.map(|h| h.version).unwrap_or(0) + 1;
            let transition = request.clone().into_transition(version, now);

            if current != request.from {
                // 重复投递的信号：当前状态已经越过了这次转换
                if self.store.contains(&transition.dedup_key()).await? {
                    debug!("忽略已应用的状态转换: {}", transition.dedup_key());
                    return Ok(AppendOutcome::Duplicate);
                }
                return Err(match current {
                    None => SchedulerError::TaskNotFound { id: task_id },
                    Some(from) => SchedulerError::InvalidTransition {
                        task_id,
                        from,
                        to: request.to,
                    },
                });
            }

            Self::check_edge(&request)?;

            match self.store.append(&transition).await {
                Ok(()) => return Ok(AppendOutcome::Applied(transition)),
                Err(LedgerAppendError::Duplicate { key }) => {
                    debug!("忽略已应用的状态转换: {}", key);
                    return Ok(AppendOutcome::Duplicate);
                }
                Err(LedgerAppendError::Conflict { expected, actual }) => {
                    conflicts += 1;
                    if conflicts > self.max_conflict_retries {
                        warn!(
                            "任务 {} 的账本写入冲突次数超过上限 ({})",
                            task_id, self.max_conflict_retries
                        );
                        return Err(SchedulerError::LedgerWriteConflict {
                            task_id,
                            attempts: conflicts,
                        });
                    }
                    debug!(
                        "任务 {} 账本版本冲突 (期望 {}, 当前 {})，第 {} 次重试",
                        task_id, expected, actual, conflicts
                    );
                }
                Err(LedgerAppendError::Store(e)) => return Err(e),
            }
        }
    }

    /// 只读查询
    pub async fn query(&self, filter: &LedgerFilter) -> SchedulerResult<Vec<Transition>> {
        self.store.query(filter).await
    }

    /// 任务的完整转换历史
    pub async fn history(&self, task_id: TaskId) -> SchedulerResult<Vec<Transition>> {
        self.store.query(&LedgerFilter::for_task(task_id)).await
    }

    fn check_edge(request: &TransitionRequest) -> SchedulerResult<()> {
        let valid = match request.from {
            None => request.to == TaskStatus::Pending,
            Some(from) => from.can_transition_to(request.to),
        };
        if valid {
            Ok(())
        } else {
            Err(SchedulerError::InvalidTransition {
                task_id: request.task_id,
                from: request.from.unwrap_or(TaskStatus::Pending),
                to: request.to,
            })
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use taskqueue_core::{
    config::RetryConfig,
    models::{DeadLetterEntry, FailureReason, TaskId, TaskStatus},
    traits::{ErrorClass, ExecutionError, LifecycleEvent, NotificationSink},
    SchedulerError, SchedulerResult, Task, WorkerId,
};

use crate::ledger::{AppendOutcome, TaskLedger, TransitionRequest};
use crate::router::PriorityQueueRouter;

/// 失败处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// 按退避延迟重新入队
    Retrying {
        attempt_count: u32,
        delay: Duration,
        ready_at: DateTime<Utc>,
    },
    DeadLettered(FailureReason),
}

/// 重试协调器
///
/// 决定失败任务是退避重试还是进入死信队列，并持有死信条目直到操作员重放或丢弃。
pub struct RetryCoordinator {
    config: RetryConfig,
    ledger: Arc<TaskLedger>,
    router: Arc<PriorityQueueRouter>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    dead_letters: RwLock<HashMap<TaskId, DeadLetterEntry>>,
}

impl RetryCoordinator {
    pub fn new(
        config: RetryConfig,
        ledger: Arc<TaskLedger>,
        router: Arc<PriorityQueueRouter>,
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self {
            config,
            ledger,
            router,
            sinks,
            dead_letters: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `min(base * factor^attempt * (1 + jitter), max)`
    pub fn backoff_delay(&self, attempt_count: u32) -> Duration {
        self.backoff_delay_with_sample(attempt_count, rand::random::<f64>())
    }

    /// 以给定的 `[0,1)` 采样值计算退避延迟
    ///
    /// 抖动只会放大延迟，且 `backoff_factor >= 1 + jitter_ratio`，
    /// 因此同一任务相邻两次重试的延迟不会递减。
    pub fn backoff_delay_with_sample(&self, attempt_count: u32, sample: f64) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let exponent = attempt_count.min(i32::MAX as u32) as i32;
        let raw = base * self.config.backoff_factor.powi(exponent);
        let jittered = raw * (1.0 + sample.clamp(0.0, 1.0) * self.config.jitter_ratio);
        let capped = jittered.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// 处理一次执行失败
    ///
    /// 未分类错误按可重试处理，但一次消耗两次重试预算；
    /// `attempt_count` 最多累加到 `max_retries + 1`。
    pub async fn on_failure(
        &self,
        mut task: Task,
        worker_id: WorkerId,
        error: &ExecutionError,
        class: ErrorClass,
        now: DateTime<Utc>,
    ) -> SchedulerResult<FailureOutcome> {
        let charge = match class {
            ErrorClass::Unclassified => 2,
            ErrorClass::Transient | ErrorClass::Fatal => 1,
        };
        task.attempt_count = (task.attempt_count + charge).min(self.config.max_retries + 1);

        if class == ErrorClass::Fatal {
            let reason = FailureReason::Fatal {
                error: error.message.clone(),
            };
            self.dead_letter(task, reason.clone(), Some(worker_id), now)
                .await?;
            return Ok(FailureOutcome::DeadLettered(reason));
        }

        if task.attempt_count > self.config.max_retries {
            let reason = FailureReason::RetriesExhausted {
                last_error: error.message.clone(),
            };
            self.dead_letter(task, reason.clone(), Some(worker_id), now)
                .await?;
            return Ok(FailureOutcome::DeadLettered(reason));
        }

        let delay = self.backoff_delay(task.attempt_count);
        let ready_at = now + chrono::Duration::milliseconds(delay.as_millis() as i64);

        let request = TransitionRequest::for_task(&task, TaskStatus::Pending)
            .by_worker(worker_id)
            .with_reason(format!("重试 ({:?}): {}", class, error.message));
        if let AppendOutcome::Duplicate = self.ledger.append(request, now).await? {
            debug!("任务 {} 的失败信号已处理过，忽略", task.id);
            return Ok(FailureOutcome::Retrying {
                attempt_count: task.attempt_count,
                delay,
                ready_at,
            });
        }

        info!(
            "任务 {} 第 {} 次失败，{}ms 后重试: {}",
            task.id,
            task.attempt_count,
            delay.as_millis(),
            error.message
        );
        let attempt_count = task.attempt_count;
        self.router.enqueue_delayed(task, ready_at).await;

        Ok(FailureOutcome::Retrying {
            attempt_count,
            delay,
            ready_at,
        })
    }

    /// 记录完成并发出通知；重复的完成信号为空操作
    pub async fn on_success(
        &self,
        mut task: Task,
        worker_id: WorkerId,
        now: DateTime<Utc>,
    ) -> SchedulerResult<AppendOutcome> {
        let request =
            TransitionRequest::for_task(&task, TaskStatus::Completed).by_worker(worker_id);
        let outcome = self.ledger.append(request, now).await?;
        if outcome.is_applied() {
            task.status = TaskStatus::Completed;
            info!("任务 {} ({}) 执行完成", task.id, task.task_type);
            self.notify(LifecycleEvent::TaskCompleted {
                task_id: task.id,
                task_type: task.task_type.clone(),
                tier: task.tier,
                attempt_count: task.attempt_count,
                at: now,
            })
            .await;
        }
        Ok(outcome)
    }

    /// 将任务移入死信队列（终态）
    pub async fn dead_letter(
        &self,
        mut task: Task,
        reason: FailureReason,
        worker_id: Option<WorkerId>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut request = TransitionRequest::for_task(&task, TaskStatus::DeadLettered)
            .with_reason(reason.to_string());
        request.worker_id = worker_id;

        if let AppendOutcome::Duplicate = self.ledger.append(request, now).await? {
            debug!("任务 {} 已在死信队列中", task.id);
            return Ok(());
        }

        task.status = TaskStatus::DeadLettered;
        warn!("任务 {} ({}) 进入死信队列: {}", task.id, task.task_type, reason);

        let event = LifecycleEvent::TaskDeadLettered {
            task_id: task.id,
            task_type: task.task_type.clone(),
            tier: task.tier,
            reason: reason.clone(),
            at: now,
        };
        self.dead_letters
            .write()
            .await
            .insert(task.id, DeadLetterEntry::new(task, reason, now));
        self.notify(event).await;
        Ok(())
    }

    /// 按进入死信队列的时间升序列出
    pub async fn list_dead_letters(&self) -> Vec<DeadLetterEntry> {
        let mut entries: Vec<DeadLetterEntry> =
            self.dead_letters.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.dead_lettered_at);
        entries
    }

    pub async fn get_dead_letter(&self, task_id: TaskId) -> SchedulerResult<DeadLetterEntry> {
        self.dead_letters
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(SchedulerError::DeadLetterNotFound { id: task_id })
    }

    /// 移除死信条目（丢弃或重放前调用），账本历史保留
    pub async fn discard(&self, task_id: TaskId) -> SchedulerResult<DeadLetterEntry> {
        let entry = self
            .dead_letters
            .write()
            .await
            .remove(&task_id)
            .ok_or(SchedulerError::DeadLetterNotFound { id: task_id })?;
        info!("死信条目 {} 已移除", task_id);
        Ok(entry)
    }

    /// 放回一条被取出的死信条目
    pub async fn restore(&self, entry: DeadLetterEntry) {
        self.dead_letters.write().await.insert(entry.task.id, entry);
    }

    pub async fn dead_letter_count(&self) -> usize {
        self.dead_letters.read().await.len()
    }

    async fn notify(&self, event: LifecycleEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.notify(&event).await {
                warn!("发送事件 {} 失败: {}", event.name(), e);
            }
        }
    }
}

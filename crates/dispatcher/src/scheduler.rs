use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskqueue_core::{
    config::AppConfig,
    models::{
        DeadLetterEntry, FailureReason, LedgerFilter, MonitoringSnapshot, TaskId, TaskStatus,
        TierSnapshot, Transition,
    },
    traits::{ErrorClassifier, ExecutorRegistry, LedgerStore, NotificationSink},
    SchedulerError, SchedulerResult, Task, Tier,
};

use crate::health_monitor::HealthMonitor;
use crate::ledger::{TaskLedger, TransitionRequest};
use crate::pool_manager::WorkerPoolManager;
use crate::retry_coordinator::RetryCoordinator;
use crate::router::PriorityQueueRouter;
use crate::scheduling_policy::SchedulingPolicy;

/// 任务提交请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub task_type: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    /// 声明的优先级，超出 [1,5] 时被钳制
    pub priority: i64,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl SubmitRequest {
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>, priority: i64) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// 取消结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// 待处理任务直接进入死信
    DeadLettered,
    /// 执行中的任务已被标记为取消中
    Cancelling,
}

/// 调度器门面
///
/// 组装路由器、账本、健康监控、重试协调器与Worker池，对外提供提交、取消、
/// 死信操作和只读监控。
pub struct TaskScheduler {
    config: AppConfig,
    ledger: Arc<TaskLedger>,
    router: Arc<PriorityQueueRouter>,
    health: Arc<HealthMonitor>,
    retry: Arc<RetryCoordinator>,
    pool: Arc<WorkerPoolManager>,
    executors: Arc<ExecutorRegistry>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn LedgerStore>,
        executors: ExecutorRegistry,
        sinks: Vec<Arc<dyn NotificationSink>>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        let ledger = Arc::new(TaskLedger::new(store, config.ledger.max_conflict_retries));
        let router = Arc::new(PriorityQueueRouter::new(
            SchedulingPolicy::new(config.scheduling.clone()),
            config.queue.max_payload_bytes,
        ));
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let retry = Arc::new(RetryCoordinator::new(
            config.retry.clone(),
            Arc::clone(&ledger),
            Arc::clone(&router),
            sinks,
        ));
        let executors = Arc::new(executors);
        let pool = Arc::new(WorkerPoolManager::new(
            config.pool.clone(),
            config.retry.timeout_fatal_after_distinct_workers,
            Arc::clone(&router),
            Arc::clone(&health),
            Arc::clone(&retry),
            Arc::clone(&ledger),
            Arc::clone(&executors),
            classifier,
        ));

        Self {
            config,
            ledger,
            router,
            health,
            retry,
            pool,
            executors,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<TaskLedger> {
        &self.ledger
    }

    pub fn router(&self) -> &Arc<PriorityQueueRouter> {
        &self.router
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn retry(&self) -> &Arc<RetryCoordinator> {
        &self.retry
    }

    pub fn pool(&self) -> &Arc<WorkerPoolManager> {
        &self.pool
    }

    /// 启动Worker与所有后台循环
    pub async fn start(&self, shutdown_tx: &broadcast::Sender<()>) {
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        self.pool.ensure_minimum(Utc::now()).await;

        let mut handles = self.pool.start(dead_rx, shutdown_tx);
        handles.push(tokio::spawn(
            Arc::clone(&self.health).run(dead_tx, shutdown_tx.subscribe()),
        ));
        self.background.lock().await.extend(handles);
        info!(
            "调度器已启动，账本后端: {}，执行器: {:?}",
            self.ledger.store_name(),
            self.executors.task_types()
        );
    }

    /// 停止Worker并等待后台循环退出；调用前应已广播关闭信号
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.config.pool.shutdown_grace_seconds);
        self.pool.shutdown(grace).await;

        let handles: Vec<_> = self.background.lock().await.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("后台循环未能在 {:?} 内退出，强制中止", grace);
            for abort in aborts {
                abort.abort();
            }
        }
        info!("调度器已停止");
    }

    // ---- 提交与取消 ----

    pub async fn submit(&self, request: SubmitRequest) -> SchedulerResult<TaskId> {
        self.submit_at(request, Utc::now()).await
    }

    /// 校验并入队；校验失败时不会写入账本，也不会部分入队
    pub async fn submit_at(
        &self,
        request: SubmitRequest,
        now: DateTime<Utc>,
    ) -> SchedulerResult<TaskId> {
        let tier = PriorityQueueRouter::assign_tier(request.priority);
        let task = Task::new(request.task_type, request.payload, tier)
            .with_deadline(request.deadline)
            .with_created_at(now);
        self.admit(task, now).await
    }

    async fn admit(&self, task: Task, now: DateTime<Utc>) -> SchedulerResult<TaskId> {
        self.router.validate(&task)?;
        if !self.executors.contains(&task.task_type) {
            return Err(SchedulerError::Validation(format!(
                "未注册的任务类型: {}",
                task.task_type
            )));
        }

        let task_id = task.id;
        let tier = task.tier;
        self.ledger
            .append(TransitionRequest::submitted(&task), now)
            .await?;
        let score = self.router.enqueue_at(task, now).await?;
        info!("任务 {} 已提交到 {}，分数 {}", task_id, tier, score);
        Ok(task_id)
    }

    pub async fn cancel(&self, task_id: TaskId) -> SchedulerResult<CancelOutcome> {
        self.cancel_at(task_id, Utc::now()).await
    }

    /// 取消任务：待处理的直接进入死信，执行中的标记为取消中
    pub async fn cancel_at(
        &self,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> SchedulerResult<CancelOutcome> {
        if let Some(task) = self.router.remove(task_id).await {
            self.retry
                .dead_letter(task, FailureReason::Cancelled, None, now)
                .await?;
            return Ok(CancelOutcome::DeadLettered);
        }
        if self.pool.cancel_leased(task_id).await {
            return Ok(CancelOutcome::Cancelling);
        }

        match self.ledger.head(task_id).await? {
            None => Err(SchedulerError::TaskNotFound { id: task_id }),
            Some(head) if head.status.is_terminal() => Err(SchedulerError::InvalidTransition {
                task_id,
                from: head.status,
                to: TaskStatus::DeadLettered,
            }),
            Some(head) => {
                debug!("任务 {} 正处于派发过程中 ({})", task_id, head.status);
                Err(SchedulerError::TaskBusy { id: task_id })
            }
        }
    }

    // ---- 死信操作 ----

    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.retry.list_dead_letters().await
    }

    pub async fn dead_letter(&self, task_id: TaskId) -> SchedulerResult<DeadLetterEntry> {
        self.retry.get_dead_letter(task_id).await
    }

    /// 以相同类型、负载和层级重新提交一个新任务，原任务保持终态
    pub async fn replay(&self, task_id: TaskId) -> SchedulerResult<TaskId> {
        let now = Utc::now();
        let entry = self.retry.discard(task_id).await?;

        let mut task = Task::new(
            entry.task.task_type.clone(),
            entry.task.payload.clone(),
            entry.task.tier,
        )
        .with_deadline(entry.task.deadline)
        .with_created_at(now);
        task.replayed_from = Some(entry.task.id);

        match self.admit(task, now).await {
            Ok(new_id) => {
                info!("死信任务 {} 已重放为 {}", task_id, new_id);
                Ok(new_id)
            }
            Err(e) => {
                warn!("重放死信任务 {} 失败: {}", task_id, e);
                self.retry.restore(entry).await;
                Err(e)
            }
        }
    }

    /// 丢弃死信条目，账本历史保留
    pub async fn discard(&self, task_id: TaskId) -> SchedulerResult<DeadLetterEntry> {
        let entry = self.retry.discard(task_id).await?;
        info!("死信任务 {} 已丢弃", task_id);
        Ok(entry)
    }

    // ---- 只读查询 ----

    pub async fn query_ledger(&self, filter: &LedgerFilter) -> SchedulerResult<Vec<Transition>> {
        self.ledger.query(filter).await
    }

    pub async fn task_history(&self, task_id: TaskId) -> SchedulerResult<Vec<Transition>> {
        self.ledger.history(task_id).await
    }

    pub async fn monitoring_snapshot(&self) -> MonitoringSnapshot {
        self.monitoring_snapshot_at(Utc::now()).await
    }

    pub async fn monitoring_snapshot_at(&self, now: DateTime<Utc>) -> MonitoringSnapshot {
        let mut tiers = Vec::with_capacity(Tier::MAX as usize);
        for tier in Tier::all() {
            let queue = self.router.metrics(tier, now).await;
            let (name, sla_hours) = self
                .config
                .queue
                .tier(tier)
                .map(|t| (t.name.clone(), t.sla_hours))
                .unwrap_or_else(|| (tier.to_string(), 0));
            let sla_breached = sla_hours > 0
                && queue
                    .oldest_pending_age_seconds
                    .is_some_and(|age| age > sla_hours as i64 * 3600);

            tiers.push(TierSnapshot {
                tier,
                name,
                sla_hours,
                queue,
                workers: self.health.counts(tier).await,
                active_leases: self.pool.active_leases(tier).await,
                sla_breached,
            });
        }

        MonitoringSnapshot {
            tiers,
            dead_letter_count: self.retry.dead_letter_count().await,
        }
    }
}

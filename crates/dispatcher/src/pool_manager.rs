use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskqueue_core::{
    config::PoolConfig,
    models::{FailureReason, Lease, PoolEvent, QueueMetrics, TaskId, TaskStatus, WorkerState},
    traits::{ErrorClassifier, ExecutionError, ExecutorRegistry},
    SchedulerError, SchedulerResult, Task, Tier, WorkerId,
};

use crate::health_monitor::HealthMonitor;
use crate::ledger::{TaskLedger, TransitionRequest};
use crate::retry_coordinator::{FailureOutcome, RetryCoordinator};
use crate::router::PriorityQueueRouter;
use crate::worker_runtime::WorkerRuntime;

/// 派发成功后交给Worker的租约
#[derive(Debug)]
pub struct LeaseGrant {
    pub task: Task,
    pub lease: Lease,
    pub cancel_rx: watch::Receiver<bool>,
}

/// 一次扩缩容评估的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ScaleDecision {
    NoChange { active: usize },
    ScaledUp { from: usize, to: usize },
    ScaledDown { from: usize, to: usize },
    /// 处于冷却期，本次不调整
    CooldownSuppressed { active: usize, desired: usize },
}

struct LeaseSlot {
    lease: Lease,
    task: Task,
    cancel_tx: watch::Sender<bool>,
    cancelling: bool,
}

struct WorkerHandle {
    tier: Tier,
    stop_tx: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

/// Worker池管理器
///
/// 持有租约表与Worker句柄表；其他组件只能通过这里的方法派发、续约、
/// 完成或撤销租约。每个层级的扩缩容评估由独立的互斥锁串行化。
pub struct WorkerPoolManager {
    config: PoolConfig,
    timeout_fatal_threshold: usize,
    router: Arc<PriorityQueueRouter>,
    health: Arc<HealthMonitor>,
    retry: Arc<RetryCoordinator>,
    ledger: Arc<TaskLedger>,
    executors: Arc<ExecutorRegistry>,
    classifier: Arc<dyn ErrorClassifier>,
    leases: Mutex<HashMap<TaskId, LeaseSlot>>,
    workers: Mutex<HashMap<WorkerId, WorkerHandle>>,
    /// 每个层级最近一次扩缩容的时间
    last_scaled: Vec<Mutex<Option<DateTime<Utc>>>>,
    next_worker_id: AtomicU64,
    events: broadcast::Sender<PoolEvent>,
}

impl WorkerPoolManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PoolConfig,
        timeout_fatal_threshold: usize,
        router: Arc<PriorityQueueRouter>,
        health: Arc<HealthMonitor>,
        retry: Arc<RetryCoordinator>,
        ledger: Arc<TaskLedger>,
        executors: Arc<ExecutorRegistry>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            timeout_fatal_threshold,
            router,
            health,
            retry,
            ledger,
            executors,
            classifier,
            leases: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            last_scaled: Tier::all().map(|_| Mutex::new(None)).collect(),
            next_worker_id: AtomicU64::new(1),
            events,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<PriorityQueueRouter> {
        &self.router
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        &self.executors
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PoolEvent) {
        let _ = self.events.send(event);
    }

    /// Worker取任务的层级顺序：先本层级，开启工作窃取时再按层级升序尝试其他层级
    pub fn dispatch_order(&self, tier: Tier) -> Vec<Tier> {
        let mut order = vec![tier];
        if self.config.work_stealing {
            order.extend(Tier::all().filter(|t| *t != tier));
        }
        order
    }

    // ---- Worker生命周期 ----

    /// 启动一个Worker，返回其ID作为句柄
    pub async fn spawn_worker(self: &Arc<Self>, tier: Tier, now: DateTime<Utc>) -> WorkerId {
        let worker_id = WorkerId::new(self.next_worker_id.fetch_add(1, Ordering::Relaxed));
        self.health.register(worker_id, tier, now).await;

        let (stop_tx, stop_rx) = watch::channel(false);
        let runtime = WorkerRuntime::new(worker_id, tier, Arc::clone(self), stop_rx);
        let join = tokio::spawn(runtime.run());

        self.workers.lock().await.insert(
            worker_id,
            WorkerHandle {
                tier,
                stop_tx,
                join: Some(join),
            },
        );
        info!("启动Worker {} ({})", worker_id, tier);
        self.emit(PoolEvent::WorkerSpawned { worker_id, tier });
        worker_id
    }

    /// 终止Worker：正在执行的任务会先完成，记录立即销毁
    pub async fn terminate_worker(&self, worker_id: WorkerId) -> SchedulerResult<()> {
        let handle = self
            .workers
            .lock()
            .await
            .remove(&worker_id)
            .ok_or(SchedulerError::WorkerNotFound { id: worker_id })?;
        let _ = handle.stop_tx.send(true);
        self.health.deregister(worker_id).await;
        info!("终止Worker {} ({})", worker_id, handle.tier);
        self.emit(PoolEvent::WorkerTerminated {
            worker_id,
            tier: handle.tier,
        });
        Ok(())
    }

    pub async fn worker_ids(&self, tier: Tier) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self
            .workers
            .lock()
            .await
            .iter()
            .filter(|(_, handle)| handle.tier == tier)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// 每个层级启动到最小Worker数，不计入冷却
    pub async fn ensure_minimum(self: &Arc<Self>, now: DateTime<Utc>) {
        for tier in Tier::all() {
            let scaling = self.config.scaling_for(tier);
            let active = self.health.counts(tier).await.active();
            for _ in active..scaling.min_workers {
                self.spawn_worker(tier, now).await;
            }
        }
    }

    // ---- 扩缩容 ----

    pub async fn scale(self: &Arc<Self>, tier: Tier) -> ScaleDecision {
        let now = Utc::now();
        let metrics = self.router.metrics(tier, now).await;
        self.scale_at(tier, &metrics, now).await
    }

    /// 期望Worker数 = `ceil(backlog / tasks_per_worker_threshold)`，钳制到 `[min, max]`；
    /// 失效Worker不计入当前数量
    pub async fn scale_at(
        self: &Arc<Self>,
        tier: Tier,
        metrics: &QueueMetrics,
        now: DateTime<Utc>,
    ) -> ScaleDecision {
        let scaling = self.config.scaling_for(tier);
        let mut last_scaled = self.last_scaled[tier.index()].lock().await;

        let active = self.health.counts(tier).await.active();
        let needed = metrics
            .backlog_depth
            .div_ceil(scaling.tasks_per_worker_threshold.max(1));
        let desired = needed.max(scaling.min_workers).min(scaling.max_workers);

        if desired == active {
            return ScaleDecision::NoChange { active };
        }

        if let Some(last) = *last_scaled {
            if now < last + chrono::Duration::seconds(self.config.cooldown_seconds) {
                debug!(
                    "层级 {} 处于冷却期，跳过扩缩容 ({} -> {})",
                    tier, active, desired
                );
                return ScaleDecision::CooldownSuppressed { active, desired };
            }
        }

        let decision = if desired > active {
            for _ in active..desired {
                self.spawn_worker(tier, now).await;
            }
            ScaleDecision::ScaledUp {
                from: active,
                to: desired,
            }
        } else {
            for worker_id in self.pick_victims(tier, active - desired).await {
                if let Err(e) = self.terminate_worker(worker_id).await {
                    warn!("终止Worker {} 失败: {}", worker_id, e);
                }
            }
            ScaleDecision::ScaledDown {
                from: active,
                to: desired,
            }
        };

        *last_scaled = Some(now);
        info!(
            "层级 {} 扩缩容: {} -> {} (积压 {})",
            tier, active, desired, metrics.backlog_depth
        );
        decision
    }

    /// 缩容时优先终止空闲Worker
    async fn pick_victims(&self, tier: Tier, count: usize) -> Vec<WorkerId> {
        let owned = self.worker_ids(tier).await;
        let mut candidates: Vec<_> = self
            .health
            .records()
            .await
            .into_iter()
            .filter(|r| r.tier == tier && r.is_alive() && owned.contains(&r.id))
            .collect();
        candidates.sort_by_key(|r| (r.state != WorkerState::Idle, std::cmp::Reverse(r.id)));
        candidates.into_iter().take(count).map(|r| r.id).collect()
    }

    // ---- 租约 ----

    /// 为Worker取下一个任务并派发
    pub async fn acquire_next(
        &self,
        worker_id: WorkerId,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<LeaseGrant>> {
        let order = self.dispatch_order(tier);
        match self.router.dequeue_first(&order, now).await {
            Some(task) => self.dispatch(worker_id, task, now).await.map(Some),
            None => Ok(None),
        }
    }

    /// 为已出队的任务创建租约，TTL按任务类型配置
    pub async fn dispatch(
        &self,
        worker_id: WorkerId,
        mut task: Task,
        now: DateTime<Utc>,
    ) -> SchedulerResult<LeaseGrant> {
        if !self.health.is_alive(worker_id).await {
            self.router.enqueue(task).await?;
            return Err(SchedulerError::WorkerNotFound { id: worker_id });
        }
        if self.leases.lock().await.contains_key(&task.id) {
            error!("任务 {} 已持有有效租约，拒绝重复派发", task.id);
            return Err(SchedulerError::Internal(format!(
                "任务 {} 已持有有效租约",
                task.id
            )));
        }

        task.delivery_count += 1;
        let request = TransitionRequest::for_task(&task, TaskStatus::Leased).by_worker(worker_id);
        if let Err(e) = self.ledger.append(request, now).await {
            error!("记录任务 {} 的租约失败: {}", task.id, e);
            task.delivery_count -= 1;
            self.router.enqueue(task).await?;
            return Err(e);
        }

        let ttl = chrono::Duration::milliseconds(self.config.lease_ttl_ms(&task.task_type));
        let lease = Lease::new(task.id, worker_id, task.delivery_count, now, ttl);
        task.status = TaskStatus::Leased;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.leases.lock().await.insert(
            task.id,
            LeaseSlot {
                lease: lease.clone(),
                task: task.clone(),
                cancel_tx,
                cancelling: false,
            },
        );
        self.health.set_state(worker_id, WorkerState::Busy).await;
        debug!(
            "任务 {} 派发给Worker {}，租约至 {}",
            task.id, worker_id, lease.expires_at
        );

        Ok(LeaseGrant {
            task,
            lease,
            cancel_rx,
        })
    }

    /// 租约持有者上报进度，续约一个TTL。取消中的租约不再续约，到期后强制撤销
    pub async fn renew(
        &self,
        task_id: TaskId,
        worker_id: WorkerId,
        generation: u32,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut leases = self.leases.lock().await;
        match leases.get_mut(&task_id) {
            Some(slot) if slot.lease.is_held_by(worker_id, generation) && !slot.cancelling => {
                slot.lease.renew(now);
                Ok(())
            }
            Some(slot) if slot.cancelling => {
                debug!("任务 {} 取消中，拒绝Worker {} 的续约", task_id, worker_id);
                Err(SchedulerError::LeaseNotFound { task_id })
            }
            _ => Err(SchedulerError::LeaseNotFound { task_id }),
        }
    }

    /// 取出由该Worker该代持有的租约；否则说明信号已过期
    async fn take_lease(
        &self,
        task_id: TaskId,
        worker_id: WorkerId,
        generation: u32,
    ) -> Option<LeaseSlot> {
        let mut leases = self.leases.lock().await;
        match leases.get(&task_id) {
            Some(slot) if slot.lease.is_held_by(worker_id, generation) => leases.remove(&task_id),
            _ => None,
        }
    }

    /// 执行成功：释放租约并记录完成。返回 false 表示租约已被撤销，信号被忽略
    pub async fn complete(
        &self,
        task_id: TaskId,
        worker_id: WorkerId,
        generation: u32,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        self.health.set_state(worker_id, WorkerState::Idle).await;
        let Some(slot) = self.take_lease(task_id, worker_id, generation).await else {
            debug!("忽略Worker {} 对任务 {} 的过期完成信号", worker_id, task_id);
            return Ok(false);
        };

        if let Err(e) = self.retry.on_success(slot.task.clone(), worker_id, now).await {
            // 放回租约，由过期回收重新入队
            self.leases.lock().await.insert(task_id, slot);
            return Err(e);
        }
        Ok(true)
    }

    /// 执行失败：释放租约并交给重试协调器。返回 None 表示信号已过期
    pub async fn fail(
        &self,
        task_id: TaskId,
        worker_id: WorkerId,
        generation: u32,
        error: &ExecutionError,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<FailureOutcome>> {
        self.health.set_state(worker_id, WorkerState::Idle).await;
        let Some(slot) = self.take_lease(task_id, worker_id, generation).await else {
            debug!("忽略Worker {} 对任务 {} 的过期失败信号", worker_id, task_id);
            return Ok(None);
        };

        let result = if slot.cancelling {
            self.retry
                .dead_letter(
                    slot.task.clone(),
                    FailureReason::Cancelled,
                    Some(worker_id),
                    now,
                )
                .await
                .map(|_| FailureOutcome::DeadLettered(FailureReason::Cancelled))
        } else {
            let class = self.classifier.classify(&slot.task, error);
            self.retry
                .on_failure(slot.task.clone(), worker_id, error, class, now)
                .await
        };

        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                self.leases.lock().await.insert(task_id, slot);
                Err(e)
            }
        }
    }

    /// 标记租约中的任务为取消中；返回 false 表示任务不在租约中
    pub async fn cancel_leased(&self, task_id: TaskId) -> bool {
        let mut leases = self.leases.lock().await;
        match leases.get_mut(&task_id) {
            Some(slot) => {
                slot.cancelling = true;
                let _ = slot.cancel_tx.send(true);
                info!("任务 {} 标记为取消中", task_id);
                true
            }
            None => false,
        }
    }

    /// 回收所有已过期的租约，返回被撤销的任务
    pub async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let expired: Vec<LeaseSlot> = {
            let mut leases = self.leases.lock().await;
            let ids: Vec<TaskId> = leases
                .iter()
                .filter(|(_, slot)| slot.lease.is_expired(now))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| leases.remove(id)).collect()
        };

        let mut revoked = Vec::with_capacity(expired.len());
        for slot in expired {
            let task_id = slot.task.id;
            match self.revoke(&slot, now).await {
                Ok(()) => revoked.push(task_id),
                Err(e) => {
                    error!("撤销任务 {} 的租约失败，下次回收时重试: {}", task_id, e);
                    self.restore_expired(slot, now).await;
                }
            }
        }
        revoked
    }

    /// 撤销失败时放回租约表并标记为已过期，保证任务不会丢失
    async fn restore_expired(&self, mut slot: LeaseSlot, now: DateTime<Utc>) {
        slot.lease.expires_at = slot.lease.expires_at.min(now);
        self.leases.lock().await.insert(slot.task.id, slot);
    }

    /// 处理失效Worker：停止其运行时，立即撤销其持有的租约
    pub async fn handle_dead_workers(&self, worker_ids: &[WorkerId], now: DateTime<Utc>) {
        for worker_id in worker_ids {
            let mut tier = self.health.get(*worker_id).await.map(|record| record.tier);
            if let Some(handle) = self.workers.lock().await.remove(worker_id) {
                tier = Some(handle.tier);
                let _ = handle.stop_tx.send(true);
                if let Some(join) = handle.join {
                    join.abort();
                }
            }
            match tier {
                Some(tier) => self.emit(PoolEvent::WorkerDeclaredDead {
                    worker_id: *worker_id,
                    tier,
                }),
                None => warn!("未知的失效Worker {}", worker_id),
            }

            let held: Vec<LeaseSlot> = {
                let mut leases = self.leases.lock().await;
                let ids: Vec<TaskId> = leases
                    .iter()
                    .filter(|(_, slot)| slot.lease.worker_id == *worker_id)
                    .map(|(id, _)| *id)
                    .collect();
                ids.iter().filter_map(|id| leases.remove(id)).collect()
            };

            for slot in held {
                let task_id = slot.task.id;
                info!("Worker {} 已失效，立即撤销任务 {} 的租约", worker_id, task_id);
                if let Err(e) = self.revoke(&slot, now).await {
                    error!("撤销任务 {} 的租约失败，交给过期回收重试: {}", task_id, e);
                    self.restore_expired(slot, now).await;
                }
            }
        }
    }

    /// 撤销租约：任务以新的待处理条目回到原层级，不消耗重试预算。
    /// 取消中的任务、或在足够多不同Worker上超时的任务直接进入死信。
    ///
    /// 只有在账本与队列都处理成功后才通知Worker停止并发出撤销事件；
    /// 失败时槽位保持不变，由调用方放回租约表。
    async fn revoke(&self, slot: &LeaseSlot, now: DateTime<Utc>) -> SchedulerResult<()> {
        let worker_id = slot.lease.worker_id;
        let mut task = slot.task.clone();
        let task_id = task.id;
        warn!("{}", SchedulerError::WorkerTimeout { task_id, worker_id });

        if slot.cancelling {
            self.retry
                .dead_letter(task, FailureReason::Cancelled, Some(worker_id), now)
                .await?;
        } else if task.record_timeout(worker_id) >= self.timeout_fatal_threshold {
            let workers = task.timed_out_workers.clone();
            self.retry
                .dead_letter(
                    task,
                    FailureReason::RepeatedTimeouts { workers },
                    Some(worker_id),
                    now,
                )
                .await?;
        } else {
            let request = TransitionRequest::for_task(&task, TaskStatus::Pending)
                .by_worker(worker_id)
                .with_reason("租约超时");
            self.ledger.append(request, now).await?;
            self.router.enqueue_at(task, now).await?;
        }

        let _ = slot.cancel_tx.send(true);
        self.emit(PoolEvent::LeaseRevoked {
            task_id,
            worker_id,
            tier: slot.task.tier,
        });
        Ok(())
    }

    pub async fn lease(&self, task_id: TaskId) -> Option<Lease> {
        self.leases
            .lock()
            .await
            .get(&task_id)
            .map(|slot| slot.lease.clone())
    }

    pub async fn active_leases(&self, tier: Tier) -> usize {
        self.leases
            .lock()
            .await
            .values()
            .filter(|slot| slot.task.tier == tier)
            .count()
    }

    // ---- 后台循环 ----

    /// 启动每层级扩缩容循环、租约回收循环与失效Worker处理循环
    pub fn start(
        self: &Arc<Self>,
        dead_rx: mpsc::UnboundedReceiver<Vec<WorkerId>>,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for tier in Tier::all() {
            let pool = Arc::clone(self);
            let mut shutdown_rx = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(
                    pool.config.scale_interval_seconds,
                ));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            pool.scale(tier).await;
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
                debug!("层级 {} 扩缩容循环退出", tier);
            }));
        }

        let pool = Arc::clone(self);
        let mut shutdown_rx = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(pool.config.lease_check_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let revoked = pool.reap_expired_leases(Utc::now()).await;
                        if !revoked.is_empty() {
                            info!("回收了 {} 个过期租约", revoked.len());
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("租约回收循环退出");
        }));

        let pool = Arc::clone(self);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut dead_rx = dead_rx;
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    dead = dead_rx.recv() => match dead {
                        Some(worker_ids) => pool.handle_dead_workers(&worker_ids, Utc::now()).await,
                        None => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("失效Worker处理循环退出");
        }));

        handles
    }

    /// 停止所有Worker，等待正在执行的任务完成，超时后强制中止
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<(WorkerId, WorkerHandle)> = self.workers.lock().await.drain().collect();
        info!("停止 {} 个Worker", handles.len());

        let mut joins = Vec::new();
        for (worker_id, mut handle) in handles {
            let _ = handle.stop_tx.send(true);
            if let Some(join) = handle.join.take() {
                joins.push((worker_id, join));
            }
        }
        self.router.wake_all();

        let aborts: Vec<_> = joins.iter().map(|(_, join)| join.abort_handle()).collect();
        let waiting = futures::future::join_all(joins.into_iter().map(|(_, join)| join));
        if tokio::time::timeout(grace, waiting).await.is_err() {
            warn!("等待Worker退出超时 ({:?})，强制中止", grace);
            for abort in aborts {
                abort.abort();
            }
        }

        for record in self.health.records().await {
            self.health.deregister(record.id).await;
        }
        info!("Worker池已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use taskqueue_core::config::{HealthConfig, RetryConfig, TierScalingConfig};
    use taskqueue_core::traits::{DefaultErrorClassifier, LedgerStore};
    use taskqueue_infrastructure::InMemoryLedgerStore;
    use taskqueue_testing_utils::FlakyLedgerStore;

    struct Fixture {
        pool: Arc<WorkerPoolManager>,
        router: Arc<PriorityQueueRouter>,
        health: Arc<HealthMonitor>,
        ledger: Arc<TaskLedger>,
        retry: Arc<RetryCoordinator>,
    }

    fn fixture(config: PoolConfig) -> Fixture {
        fixture_with_store(config, Arc::new(InMemoryLedgerStore::new()))
    }

    fn fixture_with_store(config: PoolConfig, store: Arc<dyn LedgerStore>) -> Fixture {
        let ledger = Arc::new(TaskLedger::new(store, 3));
        let router = Arc::new(PriorityQueueRouter::default());
        let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
        let retry = Arc::new(RetryCoordinator::new(
            RetryConfig::default(),
            ledger.clone(),
            router.clone(),
            Vec::new(),
        ));
        let pool = Arc::new(WorkerPoolManager::new(
            config,
            3,
            router.clone(),
            health.clone(),
            retry.clone(),
            ledger.clone(),
            Arc::new(ExecutorRegistry::new()),
            Arc::new(DefaultErrorClassifier),
        ));
        Fixture {
            pool,
            router,
            health,
            ledger,
            retry,
        }
    }

    impl Fixture {
        async fn submit(&self, tier: Tier, now: DateTime<Utc>) -> TaskId {
            let task = Task::new("job", vec![], tier).with_created_at(now);
            let id = task.id;
            self.ledger
                .append(TransitionRequest::submitted(&task), now)
                .await
                .unwrap();
            self.router.enqueue_at(task, now).await.unwrap();
            id
        }

        async fn worker(&self, raw: u64, now: DateTime<Utc>) -> WorkerId {
            let id = WorkerId::new(raw);
            self.health.register(id, Tier::CRITICAL, now).await;
            id
        }
    }

    fn ttl() -> ChronoDuration {
        ChronoDuration::milliseconds(PoolConfig::default().lease_ttl_ms("job"))
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        let f = fixture(PoolConfig::default());
        let now = Utc::now();
        let w1 = f.worker(1, now).await;
        let w2 = f.worker(2, now).await;
        let id = f.submit(Tier::CRITICAL, now).await;

        let grant = f.pool.acquire_next(w1, Tier::CRITICAL, now).await.unwrap().unwrap();
        assert_eq!(grant.lease.generation, 1);
        assert_eq!(f.health.get(w1).await.unwrap().state, WorkerState::Busy);
        assert_eq!(f.pool.active_leases(Tier::CRITICAL).await, 1);

        assert!(!f.pool.complete(id, w2, 1, now).await.unwrap());
        assert!(f.pool.complete(id, w1, 1, now).await.unwrap());
        assert_eq!(
            f.ledger.head(id).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
        assert!(f.pool.lease(id).await.is_none());
        assert_eq!(f.health.get(w1).await.unwrap().state, WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_expired_lease_goes_to_another_worker() {
        let f = fixture(PoolConfig::default());
        let now = Utc::now();
        let w1 = f.worker(1, now).await;
        let w2 = f.worker(2, now).await;
        let id = f.submit(Tier::CRITICAL, now).await;

        f.pool.acquire_next(w1, Tier::CRITICAL, now).await.unwrap().unwrap();
        assert!(f.pool.reap_expired_leases(now + ttl() - ChronoDuration::milliseconds(1)).await.is_empty());

        let later = now + ttl();
        assert_eq!(f.pool.reap_expired_leases(later).await, vec![id]);
        assert_eq!(
            f.ledger.head(id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );

        let grant = f.pool.acquire_next(w2, Tier::CRITICAL, later).await.unwrap().unwrap();
        assert_eq!(grant.task.id, id);
        assert_eq!(grant.lease.worker_id, w2);
        assert_eq!(grant.lease.generation, 2);
        // 租约过期不消耗重试预算
        assert_eq!(grant.task.attempt_count, 0);
        assert_eq!(grant.task.timed_out_workers, vec![w1]);

        // 第一个Worker迟到的完成信号被拒绝
        assert!(!f.pool.complete(id, w1, 1, later).await.unwrap());
        assert!(f.pool.complete(id, w2, 2, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_repeated_timeouts_dead_letter() {
        let f = fixture(PoolConfig::default());
        let mut now = Utc::now();
        let id = f.submit(Tier::CRITICAL, now).await;

        for raw in 1..=3 {
            let worker = f.worker(raw, now).await;
            f.pool.acquire_next(worker, Tier::CRITICAL, now).await.unwrap().unwrap();
            now = now + ttl();
            f.pool.reap_expired_leases(now).await;
        }

        let entry = f.retry.get_dead_letter(id).await.unwrap();
        assert!(matches!(
            entry.failure_reason,
            FailureReason::RepeatedTimeouts { ref workers } if workers.len() == 3
        ));
        assert!(f.router.is_empty().await);
    }

    #[tokio::test]
    async fn test_dead_worker_leases_revoked_immediately() {
        let f = fixture(PoolConfig::default());
        let now = Utc::now();
        let w1 = f.worker(1, now).await;
        let id = f.submit(Tier::CRITICAL, now).await;
        let mut events = f.pool.subscribe_events();

        let grant = f.pool.acquire_next(w1, Tier::CRITICAL, now).await.unwrap().unwrap();
        f.pool.handle_dead_workers(&[w1], now).await;

        assert!(*grant.cancel_rx.borrow());
        assert!(f.pool.lease(id).await.is_none());
        assert_eq!(f.router.len().await, 1);
        assert_eq!(
            events.recv().await.unwrap(),
            PoolEvent::WorkerDeclaredDead {
                worker_id: w1,
                tier: Tier::CRITICAL
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            PoolEvent::LeaseRevoked {
                task_id: id,
                worker_id: w1,
                tier: Tier::CRITICAL
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_lease_dead_letters_on_failure() {
        let f = fixture(PoolConfig::default());
        let now = Utc::now();
        let w1 = f.worker(1, now).await;
        let id = f.submit(Tier::CRITICAL, now).await;

        let grant = f.pool.acquire_next(w1, Tier::CRITICAL, now).await.unwrap().unwrap();
        assert!(f.pool.cancel_leased(id).await);
        assert!(*grant.cancel_rx.borrow());

        let outcome = f
            .pool
            .fail(id, w1, 1, &ExecutionError::fatal("cancelled"), now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Some(FailureOutcome::DeadLettered(FailureReason::Cancelled))
        );
        assert_eq!(
            f.retry.get_dead_letter(id).await.unwrap().failure_reason,
            FailureReason::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancelling_lease_is_not_renewed() {
        let f = fixture(PoolConfig::default());
        let now = Utc::now();
        let w1 = f.worker(1, now).await;
        let id = f.submit(Tier::CRITICAL, now).await;

        f.pool.acquire_next(w1, Tier::CRITICAL, now).await.unwrap().unwrap();
        f.pool.renew(id, w1, 1, now).await.unwrap();
        assert!(f.pool.cancel_leased(id).await);

        // 执行器忽略取消信号但持续上报进度
        for secs in [30, 60, 90, 120] {
            let result = f.pool.renew(id, w1, 1, now + ChronoDuration::seconds(secs)).await;
            assert!(matches!(result, Err(SchedulerError::LeaseNotFound { .. })));
        }

        assert_eq!(f.pool.reap_expired_leases(now + ttl()).await, vec![id]);
        assert!(f.pool.lease(id).await.is_none());
        assert_eq!(
            f.retry.get_dead_letter(id).await.unwrap().failure_reason,
            FailureReason::Cancelled
        );
        assert!(f.router.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_revocation_keeps_lease_for_next_reap() {
        let store = Arc::new(FlakyLedgerStore::new(Arc::new(InMemoryLedgerStore::new())));
        let f = fixture_with_store(PoolConfig::default(), store.clone());
        let now = Utc::now();
        let w1 = f.worker(1, now).await;
        let id = f.submit(Tier::CRITICAL, now).await;
        let grant = f.pool.acquire_next(w1, Tier::CRITICAL, now).await.unwrap().unwrap();

        let expired_at = now + ttl();
        store.set_failing(true);
        assert!(f.pool.reap_expired_leases(expired_at).await.is_empty());
        assert!(store.rejected() > 0);
        assert!(f.pool.lease(id).await.is_some());
        assert!(!*grant.cancel_rx.borrow());
        assert!(f.router.is_empty().await);
        assert_eq!(
            f.ledger.head(id).await.unwrap().unwrap().status,
            TaskStatus::Leased
        );

        store.set_failing(false);
        assert_eq!(f.pool.reap_expired_leases(expired_at).await, vec![id]);
        assert!(f.pool.lease(id).await.is_none());
        assert!(*grant.cancel_rx.borrow());
        assert_eq!(f.router.len().await, 1);
        assert_eq!(
            f.ledger.head(id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_failed_dead_worker_revocation_retried_by_reaper() {
        let store = Arc::new(FlakyLedgerStore::new(Arc::new(InMemoryLedgerStore::new())));
        let f = fixture_with_store(PoolConfig::default(), store.clone());
        let now = Utc::now();
        let w1 = f.worker(1, now).await;
        let id = f.submit(Tier::CRITICAL, now).await;
        f.pool.acquire_next(w1, Tier::CRITICAL, now).await.unwrap().unwrap();

        store.set_failing(true);
        f.pool.handle_dead_workers(&[w1], now).await;
        // 放回的租约立即视为过期，不必等待原TTL
        assert!(f.pool.lease(id).await.unwrap().is_expired(now));

        store.set_failing(false);
        assert_eq!(f.pool.reap_expired_leases(now).await, vec![id]);
        assert_eq!(f.router.len().await, 1);
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_worker_keeps_task() {
        let f = fixture(PoolConfig::default());
        let now = Utc::now();
        f.submit(Tier::CRITICAL, now).await;

        let result = f.pool.acquire_next(WorkerId::new(99), Tier::CRITICAL, now).await;
        assert!(matches!(result, Err(SchedulerError::WorkerNotFound { .. })));
        assert_eq!(f.router.len().await, 1);
    }

    #[tokio::test]
    async fn test_work_stealing_order() {
        let f = fixture(PoolConfig::default());
        let now = Utc::now();
        let w1 = f.worker(1, now).await;
        let low = f.submit(Tier::BACKGROUND, now).await;

        assert_eq!(
            f.pool.dispatch_order(Tier::new(3).unwrap()),
            vec![
                Tier::new(3).unwrap(),
                Tier::CRITICAL,
                Tier::new(2).unwrap(),
                Tier::new(4).unwrap(),
                Tier::BACKGROUND
            ]
        );
        let grant = f.pool.acquire_next(w1, Tier::CRITICAL, now).await.unwrap().unwrap();
        assert_eq!(grant.task.id, low);

        let no_stealing = fixture(PoolConfig {
            work_stealing: false,
            ..Default::default()
        });
        assert_eq!(no_stealing.pool.dispatch_order(Tier::CRITICAL), vec![Tier::CRITICAL]);
    }

    fn scaling_config(min: usize, max: usize, threshold: usize) -> PoolConfig {
        PoolConfig {
            tiers: vec![TierScalingConfig::new(Tier::CRITICAL, min, max, threshold)],
            ..Default::default()
        }
    }

    fn backlog(depth: usize) -> QueueMetrics {
        QueueMetrics {
            backlog_depth: depth,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scaling_respects_cooldown() {
        let f = fixture(scaling_config(1, 4, 5));
        let now = Utc::now();
        let tier = Tier::CRITICAL;

        assert_eq!(
            f.pool.scale_at(tier, &backlog(12), now).await,
            ScaleDecision::ScaledUp { from: 0, to: 3 }
        );
        assert_eq!(f.pool.worker_ids(tier).await.len(), 3);

        assert_eq!(
            f.pool
                .scale_at(tier, &backlog(40), now + ChronoDuration::seconds(10))
                .await,
            ScaleDecision::CooldownSuppressed {
                active: 3,
                desired: 4
            }
        );
        assert_eq!(
            f.pool
                .scale_at(tier, &backlog(15), now + ChronoDuration::seconds(30))
                .await,
            ScaleDecision::NoChange { active: 3 }
        );
        assert_eq!(
            f.pool
                .scale_at(tier, &backlog(0), now + ChronoDuration::seconds(61))
                .await,
            ScaleDecision::ScaledDown { from: 3, to: 1 }
        );
        assert_eq!(f.health.counts(tier).await.active(), 1);

        f.pool.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_constant_backlog_below_threshold_is_stable() {
        let f = fixture(scaling_config(1, 4, 5));
        let now = Utc::now();
        let tier = Tier::CRITICAL;
        f.pool.ensure_minimum(now).await;

        for step in 0..6 {
            let at = now + ChronoDuration::seconds(step * 10);
            assert_eq!(
                f.pool.scale_at(tier, &backlog(3), at).await,
                ScaleDecision::NoChange { active: 1 }
            );
        }
        assert_eq!(f.pool.worker_ids(tier).await.len(), 1);

        f.pool.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_dead_workers_not_counted_as_active() {
        let f = fixture(scaling_config(2, 4, 5));
        let now = Utc::now();
        let tier = Tier::CRITICAL;
        f.pool.ensure_minimum(now).await;
        let ids = f.pool.worker_ids(tier).await;
        assert_eq!(ids.len(), 2);

        f.health.set_state(ids[0], WorkerState::Dead).await;
        f.pool.handle_dead_workers(&ids[..1], now).await;
        assert_eq!(
            f.pool.scale_at(tier, &backlog(0), now).await,
            ScaleDecision::ScaledUp { from: 1, to: 2 }
        );

        f.pool.shutdown(std::time::Duration::from_secs(1)).await;
    }
}

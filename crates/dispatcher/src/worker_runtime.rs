use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use taskqueue_core::{
    traits::{ExecutionContext, ExecutionError, TaskOutput},
    Tier, WorkerId,
};

use crate::pool_manager::{LeaseGrant, WorkerPoolManager};

/// 单个Worker的执行循环
///
/// 空闲时等待本层级的新任务，执行期间按心跳间隔上报存活，
/// 执行器上报进度时为租约续期。
pub struct WorkerRuntime {
    id: WorkerId,
    tier: Tier,
    pool: Arc<WorkerPoolManager>,
    stop_rx: watch::Receiver<bool>,
}

impl WorkerRuntime {
    pub(crate) fn new(
        id: WorkerId,
        tier: Tier,
        pool: Arc<WorkerPoolManager>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            tier,
            pool,
            stop_rx,
        }
    }

    pub async fn run(mut self) {
        info!("Worker {} ({}) 启动", self.id, self.tier);
        let idle_poll = Duration::from_millis(self.pool.config().idle_poll_interval_ms);
        let heartbeat_every =
            Duration::from_millis(self.pool.health().config().heartbeat_interval_ms);

        loop {
            if *self.stop_rx.borrow() {
                break;
            }
            self.beat().await;

            match self.pool.acquire_next(self.id, self.tier, Utc::now()).await {
                Ok(Some(grant)) => {
                    self.execute(grant, heartbeat_every).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!("Worker {} 获取任务失败: {}", self.id, e),
            }

            let router = Arc::clone(self.pool.router());
            tokio::select! {
                _ = router.wait_for_work(self.tier, idle_poll) => {}
                changed = self.stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Worker {} 已停止", self.id);
    }

    async fn beat(&self) {
        if let Err(e) = self.pool.health().heartbeat(self.id, Utc::now()).await {
            debug!("Worker {} 心跳被拒绝: {}", self.id, e);
        }
    }

    async fn execute(&self, grant: LeaseGrant, heartbeat_every: Duration) {
        let LeaseGrant {
            task,
            lease,
            cancel_rx,
        } = grant;
        let task_id = task.id;
        let generation = lease.generation;
        debug!("Worker {} 开始执行任务 {} ({})", self.id, task_id, task.task_type);

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let ctx = ExecutionContext::new(task, self.id, generation, cancel_rx, progress_tx);

        let result: Result<TaskOutput, ExecutionError> =
            match self.pool.executors().get(&ctx.task.task_type) {
                None => Err(ExecutionError::fatal(format!(
                    "没有为任务类型 {} 注册执行器",
                    ctx.task.task_type
                ))),
                Some(executor) => {
                    let execution = executor.execute(&ctx);
                    tokio::pin!(execution);
                    let mut heartbeat = tokio::time::interval(heartbeat_every);
                    loop {
                        tokio::select! {
                            result = &mut execution => break result,
                            _ = heartbeat.tick() => self.beat().await,
                            Some(()) = progress_rx.recv() => {
                                if let Err(e) = self
                                    .pool
                                    .renew(task_id, self.id, generation, Utc::now())
                                    .await
                                {
                                    debug!("任务 {} 续约失败: {}", task_id, e);
                                }
                            }
                        }
                    }
                }
            };

        let now = Utc::now();
        let reported = match result {
            Ok(output) => {
                debug!("任务 {} 执行成功，输出: {}", task_id, output);
                self.pool
                    .complete(task_id, self.id, generation, now)
                    .await
                    .map(|_| ())
            }
            Err(err) => {
                debug!("任务 {} 执行失败: {}", task_id, err);
                self.pool
                    .fail(task_id, self.id, generation, &err, now)
                    .await
                    .map(|_| ())
            }
        };
        if let Err(e) = reported {
            error!("Worker {} 上报任务 {} 的结果失败: {}", self.id, task_id, e);
        }
    }
}

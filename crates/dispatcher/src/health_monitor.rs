use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use taskqueue_core::{
    config::HealthConfig,
    models::{WorkerCounts, WorkerRecord, WorkerState},
    SchedulerError, SchedulerResult, Tier, WorkerId,
};

const STATE_IDLE: u8 = 0;
const STATE_BUSY: u8 = 1;
const STATE_DEAD: u8 = 2;

fn encode_state(state: WorkerState) -> u8 {
    match state {
        WorkerState::Idle => STATE_IDLE,
        WorkerState::Busy => STATE_BUSY,
        WorkerState::Dead => STATE_DEAD,
    }
}

fn decode_state(raw: u8) -> WorkerState {
    match raw {
        STATE_IDLE => WorkerState::Idle,
        STATE_BUSY => WorkerState::Busy,
        _ => WorkerState::Dead,
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// 单个Worker的心跳槽位，心跳写入只需原子操作
#[derive(Debug)]
struct WorkerSlot {
    tier: Tier,
    spawned_at: DateTime<Utc>,
    last_heartbeat_ms: AtomicI64,
    state: AtomicU8,
    dead_at_ms: AtomicI64,
}

impl WorkerSlot {
    fn record(&self, id: WorkerId) -> WorkerRecord {
        WorkerRecord {
            id,
            tier: self.tier,
            last_heartbeat: from_millis(self.last_heartbeat_ms.load(Ordering::Acquire)),
            state: decode_state(self.state.load(Ordering::Acquire)),
            spawned_at: self.spawned_at,
        }
    }
}

/// Worker健康监控
///
/// 心跳写入只持有读锁并原子更新时间戳；失效检测周期性扫描，
/// 先读取再标记，不会阻塞心跳写入者。新判定失效的Worker通过通道交给池管理器处理。
pub struct HealthMonitor {
    config: HealthConfig,
    workers: RwLock<HashMap<WorkerId, Arc<WorkerSlot>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            workers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// 注册新Worker，注册时间视为第一次心跳
    pub async fn register(&self, worker_id: WorkerId, tier: Tier, now: DateTime<Utc>) {
        let slot = Arc::new(WorkerSlot {
            tier,
            spawned_at: now,
            last_heartbeat_ms: AtomicI64::new(now.timestamp_millis()),
            state: AtomicU8::new(STATE_IDLE),
            dead_at_ms: AtomicI64::new(0),
        });
        self.workers.write().await.insert(worker_id, slot);
        debug!("注册Worker {} ({})", worker_id, tier);
    }

    /// 移除Worker记录（正常终止）
    pub async fn deregister(&self, worker_id: WorkerId) -> Option<WorkerRecord> {
        let slot = self.workers.write().await.remove(&worker_id)?;
        debug!("注销Worker {}", worker_id);
        Some(slot.record(worker_id))
    }

    /// 记录心跳，幂等；较旧的时间戳不会覆盖较新的
    pub async fn heartbeat(
        &self,
        worker_id: WorkerId,
        timestamp: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let workers = self.workers.read().await;
        let slot = workers
            .get(&worker_id)
            .ok_or(SchedulerError::WorkerNotFound { id: worker_id })?;
        slot.last_heartbeat_ms
            .fetch_max(timestamp.timestamp_millis(), Ordering::AcqRel);
        Ok(())
    }

    /// 更新Worker忙闲状态，已失效的Worker不会被复活
    pub async fn set_state(&self, worker_id: WorkerId, state: WorkerState) {
        let workers = self.workers.read().await;
        if let Some(slot) = workers.get(&worker_id) {
            let next = encode_state(state);
            let _ = slot
                .state
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current != STATE_DEAD).then_some(next)
                });
        }
    }

    pub async fn is_alive(&self, worker_id: WorkerId) -> bool {
        self.workers
            .read()
            .await
            .get(&worker_id)
            .map(|slot| slot.state.load(Ordering::Acquire) != STATE_DEAD)
            .unwrap_or(false)
    }

    /// 失效检测：心跳超时的Worker被标记为失效并返回；
    /// 超过保留期的失效记录被清理
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<WorkerId> {
        let timeout_ms = self.config.heartbeat_timeout_ms();
        let retention_ms = self.config.dead_worker_retention_seconds * 1000;
        let now_ms = now.timestamp_millis();

        let mut newly_dead = Vec::new();
        let mut expired = Vec::new();
        {
            let workers = self.workers.read().await;
            for (id, slot) in workers.iter() {
                if slot.state.load(Ordering::Acquire) == STATE_DEAD {
                    if now_ms - slot.dead_at_ms.load(Ordering::Acquire) > retention_ms {
                        expired.push(*id);
                    }
                    continue;
                }
                let last = slot.last_heartbeat_ms.load(Ordering::Acquire);
                if now_ms - last > timeout_ms {
                    let previous = slot.state.swap(STATE_DEAD, Ordering::AcqRel);
                    if previous != STATE_DEAD {
                        slot.dead_at_ms.store(now_ms, Ordering::Release);
                        warn!(
                            "Worker {} 已 {}ms 未发送心跳，判定为失效",
                            id,
                            now_ms - last
                        );
                        newly_dead.push(*id);
                    }
                }
            }
        }

        if !expired.is_empty() {
            let mut workers = self.workers.write().await;
            for id in &expired {
                workers.remove(id);
            }
            info!("清理了 {} 条失效Worker记录", expired.len());
        }

        newly_dead.sort();
        newly_dead
    }

    /// 存活快照 `{worker_id: state}`
    pub async fn liveness(&self) -> HashMap<WorkerId, WorkerState> {
        self.workers
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, decode_state(slot.state.load(Ordering::Acquire))))
            .collect()
    }

    pub async fn records(&self) -> Vec<WorkerRecord> {
        let mut records: Vec<WorkerRecord> = self
            .workers
            .read()
            .await
            .iter()
            .map(|(id, slot)| slot.record(*id))
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub async fn get(&self, worker_id: WorkerId) -> Option<WorkerRecord> {
        self.workers
            .read()
            .await
            .get(&worker_id)
            .map(|slot| slot.record(worker_id))
    }

    /// 层级内各状态的Worker数量
    pub async fn counts(&self, tier: Tier) -> WorkerCounts {
        let workers = self.workers.read().await;
        let mut counts = WorkerCounts::default();
        for slot in workers.values().filter(|slot| slot.tier == tier) {
            match decode_state(slot.state.load(Ordering::Acquire)) {
                WorkerState::Idle => counts.idle += 1,
                WorkerState::Busy => counts.busy += 1,
                WorkerState::Dead => counts.dead += 1,
            }
        }
        counts
    }

    /// 周期性失效检测循环，新失效的Worker发送到 `dead_tx`
    pub async fn run(
        self: Arc<Self>,
        dead_tx: mpsc::UnboundedSender<Vec<WorkerId>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!("启动Worker失效检测循环");
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.sweep_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let dead = self.sweep(Utc::now()).await;
                    if !dead.is_empty() && dead_tx.send(dead).is_err() {
                        warn!("失效Worker接收端已关闭，退出失效检测循环");
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，退出Worker失效检测循环");
                    break;
                }
            }
        }
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use taskqueue_core::{
    models::{QueueMetrics, TaskId, TaskStatus},
    SchedulerError, SchedulerResult, Task, Tier,
};

use crate::scheduling_policy::SchedulingPolicy;

/// 就绪队列的排序键：分数升序，其次创建时间，最后入队序号
type ReadyKey = (i64, DateTime<Utc>, u64);
/// 延迟集合的排序键：可派发时间，其次入队序号
type DelayedKey = (DateTime<Utc>, u64);

#[derive(Debug, Clone, Copy)]
enum Slot {
    Ready(ReadyKey),
    Delayed(DelayedKey),
}

#[derive(Debug, Default)]
struct TierQueue {
    ready: BTreeMap<ReadyKey, Task>,
    delayed: BTreeMap<DelayedKey, Task>,
    index: HashMap<TaskId, Slot>,
}

impl TierQueue {
    fn insert_ready(&mut self, task: Task, score: i64, seq: u64) {
        let key = (score, task.created_at, seq);
        self.index.insert(task.id, Slot::Ready(key));
        self.ready.insert(key, task);
    }

    fn insert_delayed(&mut self, task: Task, ready_at: DateTime<Utc>, seq: u64) {
        let key = (ready_at, seq);
        self.index.insert(task.id, Slot::Delayed(key));
        self.delayed.insert(key, task);
    }

    /// 按 `now` 重新计算就绪任务的分数；创建时间与入队序号保持不变，
    /// 同分任务仍按先来先出
    fn rescore(&mut self, policy: &SchedulingPolicy, now: DateTime<Utc>) {
        let ready = std::mem::take(&mut self.ready);
        for ((_, created_at, seq), task) in ready {
            let key = (policy.priority_score(&task, now), created_at, seq);
            self.index.insert(task.id, Slot::Ready(key));
            self.ready.insert(key, task);
        }
    }

    fn pop_ready(&mut self) -> Option<Task> {
        let (_, task) = self.ready.pop_first()?;
        self.index.remove(&task.id);
        Some(task)
    }

    fn remove(&mut self, task_id: TaskId) -> Option<Task> {
        match self.index.remove(&task_id)? {
            Slot::Ready(key) => self.ready.remove(&key),
            Slot::Delayed(key) => self.delayed.remove(&key),
        }
    }

    /// 取出所有到期的延迟任务
    fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let mut due = Vec::new();
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let task = entry.remove();
            self.index.remove(&task.id);
            due.push(task);
        }
        due
    }
}

struct TierLane {
    queue: Mutex<TierQueue>,
    notify: Notify,
}

/// 按层级路由的优先级队列
///
/// 每个层级一把互斥锁，出队在锁内完成，保证任意任务只会交给一个Worker。
/// 退避中的任务放在延迟集合里，到期后在出队时原子地提升到就绪队列。
pub struct PriorityQueueRouter {
    policy: SchedulingPolicy,
    max_payload_bytes: usize,
    lanes: Vec<TierLane>,
    seq: AtomicU64,
}

impl PriorityQueueRouter {
    pub fn new(policy: SchedulingPolicy, max_payload_bytes: usize) -> Self {
        let lanes = Tier::all()
            .map(|_| TierLane {
                queue: Mutex::new(TierQueue::default()),
                notify: Notify::new(),
            })
            .collect();
        Self {
            policy,
            max_payload_bytes,
            lanes,
            seq: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    fn lane(&self, tier: Tier) -> &TierLane {
        &self.lanes[tier.index()]
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// 将声明的优先级钳制到 [1,5]，超出范围时记录警告
    pub fn assign_tier(declared: i64) -> Tier {
        let (tier, clamped) = Tier::clamp_from(declared);
        if clamped {
            warn!("声明的优先级 {} 超出范围，已钳制为 {}", declared, tier);
        }
        tier
    }

    /// 校验提交内容，不合法的任务不会入队
    pub fn validate(&self, task: &Task) -> SchedulerResult<()> {
        if task.task_type.trim().is_empty() {
            return Err(SchedulerError::Validation("任务类型不能为空".to_string()));
        }
        if task.payload.len() > self.max_payload_bytes {
            return Err(SchedulerError::Validation(format!(
                "任务负载过大: {} 字节，上限 {} 字节",
                task.payload.len(),
                self.max_payload_bytes
            )));
        }
        Ok(())
    }

    pub async fn enqueue(&self, task: Task) -> SchedulerResult<i64> {
        self.enqueue_at(task, Utc::now()).await
    }

    /// 入队并返回计算出的优先级分数
    pub async fn enqueue_at(&self, mut task: Task, now: DateTime<Utc>) -> SchedulerResult<i64> {
        self.validate(&task)?;
        task.status = TaskStatus::Pending;
        let tier = task.tier;
        let score = self.policy.priority_score(&task, now);
        let seq = self.next_seq();

        let lane = self.lane(tier);
        {
            let mut queue = lane.queue.lock().await;
            debug!("任务 {} 入队 {}，分数 {}", task.id, tier, score);
            queue.insert_ready(task, score, seq);
        }
        lane.notify.notify_one();
        Ok(score)
    }

    /// 退避重新入队，`ready_at` 之前不可被派发
    pub async fn enqueue_delayed(&self, mut task: Task, ready_at: DateTime<Utc>) {
        task.status = TaskStatus::Pending;
        let seq = self.next_seq();
        let lane = self.lane(task.tier);
        debug!("任务 {} 延迟入队 {}，可派发时间 {}", task.id, task.tier, ready_at);
        lane.queue.lock().await.insert_delayed(task, ready_at, seq);
    }

    pub async fn dequeue(&self, tier: Tier) -> Option<Task> {
        self.dequeue_at(tier, Utc::now()).await
    }

    /// 取出该层级在 `now` 时刻分数最小的任务；层级为空时返回 None
    ///
    /// 年龄与紧急度加成随时间变化，出队前在锁内按当前时间重新排序。
    pub async fn dequeue_at(&self, tier: Tier, now: DateTime<Utc>) -> Option<Task> {
        let mut queue = self.lane(tier).queue.lock().await;
        for task in queue.take_due(now) {
            let seq = self.next_seq();
            queue.insert_ready(task, 0, seq);
        }
        queue.rescore(&self.policy, now);
        queue.pop_ready()
    }

    /// 依次尝试多个层级，返回第一个取到的任务
    pub async fn dequeue_first(&self, tiers: &[Tier], now: DateTime<Utc>) -> Option<Task> {
        for tier in tiers {
            if let Some(task) = self.dequeue_at(*tier, now).await {
                return Some(task);
            }
        }
        None
    }

    /// 从队列中移除一个待处理任务（就绪或延迟中）
    pub async fn remove(&self, task_id: TaskId) -> Option<Task> {
        for lane in &self.lanes {
            if let Some(task) = lane.queue.lock().await.remove(task_id) {
                return Some(task);
            }
        }
        None
    }

    /// 等待层级上有新任务，最多等待 `timeout`
    pub async fn wait_for_work(&self, tier: Tier, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.lane(tier).notify.notified()).await;
    }

    /// 唤醒所有等待中的Worker
    pub fn wake_all(&self) {
        for lane in &self.lanes {
            lane.notify.notify_waiters();
        }
    }

    pub async fn metrics(&self, tier: Tier, now: DateTime<Utc>) -> QueueMetrics {
        let queue = self.lane(tier).queue.lock().await;
        let oldest = queue
            .ready
            .values()
            .chain(queue.delayed.values())
            .map(|task| task.created_at)
            .min();
        let due = queue
            .delayed
            .keys()
            .filter(|(ready_at, _)| *ready_at <= now)
            .count();
        QueueMetrics {
            backlog_depth: queue.ready.len() + due,
            delayed_count: queue.delayed.len() - due,
            oldest_pending_age_seconds: oldest
                .map(|created_at| (now - created_at).num_seconds().max(0)),
            head_score: queue
                .ready
                .values()
                .chain(
                    queue
                        .delayed
                        .iter()
                        .filter(|((ready_at, _), _)| *ready_at <= now)
                        .map(|(_, task)| task),
                )
                .map(|task| self.policy.priority_score(task, now))
                .min(),
        }
    }

    /// 所有层级的待处理任务总数（含延迟中）
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for lane in &self.lanes {
            let queue = lane.queue.lock().await;
            total += queue.ready.len() + queue.delayed.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for PriorityQueueRouter {
    fn default() -> Self {
        Self::new(SchedulingPolicy::default(), 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn task(tier: u8, created_at: DateTime<Utc>) -> Task {
        Task::new("noop", vec![], Tier::new(tier).unwrap()).with_created_at(created_at)
    }

    async fn drain(router: &PriorityQueueRouter, now: DateTime<Utc>) -> Vec<Task> {
        let tiers: Vec<Tier> = Tier::all().collect();
        let mut out = Vec::new();
        while let Some(task) = router.dequeue_first(&tiers, now).await {
            out.push(task);
        }
        out
    }

    #[tokio::test]
    async fn test_tier_order_then_fifo() {
        let router = PriorityQueueRouter::default();
        let now = Utc::now();
        let mut ids = Vec::new();
        for (i, tier) in [1u8, 3, 2, 1, 5].into_iter().enumerate() {
            let t = task(tier, now + ChronoDuration::milliseconds(i as i64));
            ids.push(t.id);
            router.enqueue_at(t, now).await.unwrap();
        }

        let drained = drain(&router, now).await;
        let tiers: Vec<u8> = drained.iter().map(|t| t.tier.level()).collect();
        assert_eq!(tiers, vec![1, 1, 2, 3, 5]);
        // 两个层级1的任务按创建时间先后出队
        assert_eq!(drained[0].id, ids[0]);
        assert_eq!(drained[1].id, ids[3]);
    }

    #[tokio::test]
    async fn test_same_created_at_is_fifo_by_enqueue_order() {
        let router = PriorityQueueRouter::default();
        let now = Utc::now();
        let first = task(2, now);
        let second = task(2, now);
        let (a, b) = (first.id, second.id);
        router.enqueue_at(first, now).await.unwrap();
        router.enqueue_at(second, now).await.unwrap();

        assert_eq!(router.dequeue_at(Tier::new(2).unwrap(), now).await.unwrap().id, a);
        assert_eq!(router.dequeue_at(Tier::new(2).unwrap(), now).await.unwrap().id, b);
    }

    #[tokio::test]
    async fn test_approaching_deadline_overtakes_earlier_task() {
        let router = PriorityQueueRouter::default();
        let t0 = Utc::now();
        let plain = task(3, t0);
        let urgent = task(3, t0 + ChronoDuration::seconds(1))
            .with_deadline(Some(t0 + ChronoDuration::hours(2)));
        let (plain_id, urgent_id) = (plain.id, urgent.id);

        // 入队时截止时间还远，两者同分，先创建的排在前面
        let plain_score = router.enqueue_at(plain, t0).await.unwrap();
        let urgent_score = router.enqueue_at(urgent, t0).await.unwrap();
        assert_eq!(plain_score, urgent_score);

        let later = t0 + ChronoDuration::minutes(100);
        let tier = Tier::new(3).unwrap();
        let metrics = router.metrics(tier, later).await;
        let first = router.dequeue_at(tier, later).await.unwrap();
        assert_eq!(first.id, urgent_id);
        assert_eq!(
            metrics.head_score,
            Some(router.policy().priority_score(&first, later))
        );
        assert!(metrics.head_score < Some(plain_score));
        assert_eq!(router.dequeue_at(tier, later).await.unwrap().id, plain_id);
    }

    #[tokio::test]
    async fn test_aged_task_keeps_fifo_after_rescoring() {
        let router = PriorityQueueRouter::default();
        let t0 = Utc::now();
        let older = task(2, t0);
        let newer = task(2, t0 + ChronoDuration::minutes(5));
        let (older_id, newer_id) = (older.id, newer.id);
        router.enqueue_at(newer, t0 + ChronoDuration::minutes(5)).await.unwrap();
        router.enqueue_at(older, t0 + ChronoDuration::minutes(5)).await.unwrap();

        let later = t0 + ChronoDuration::minutes(30);
        let tier = Tier::new(2).unwrap();
        assert_eq!(router.dequeue_at(tier, later).await.unwrap().id, older_id);
        assert_eq!(router.dequeue_at(tier, later).await.unwrap().id, newer_id);
    }

    #[tokio::test]
    async fn test_empty_tier_returns_none() {
        let router = PriorityQueueRouter::default();
        assert!(router.dequeue(Tier::CRITICAL).await.is_none());
    }

    #[tokio::test]
    async fn test_validation_rejects_without_enqueue() {
        let router = PriorityQueueRouter::new(SchedulingPolicy::default(), 4);
        let oversized = Task::new("noop", vec![0; 5], Tier::CRITICAL);
        assert!(router.enqueue(oversized).await.unwrap_err().is_validation());

        let untyped = Task::new("  ", vec![], Tier::CRITICAL);
        assert!(router.enqueue(untyped).await.unwrap_err().is_validation());
        assert!(router.is_empty().await);
    }

    #[test]
    fn test_assign_tier_clamps() {
        assert_eq!(PriorityQueueRouter::assign_tier(0), Tier::CRITICAL);
        assert_eq!(PriorityQueueRouter::assign_tier(42), Tier::BACKGROUND);
        assert_eq!(PriorityQueueRouter::assign_tier(3).level(), 3);
    }

    #[tokio::test]
    async fn test_delayed_task_not_dequeued_early() {
        let router = PriorityQueueRouter::default();
        let now = Utc::now();
        let t = task(1, now);
        let id = t.id;
        router
            .enqueue_delayed(t, now + ChronoDuration::seconds(5))
            .await;

        assert!(router.dequeue_at(Tier::CRITICAL, now).await.is_none());
        let metrics = router.metrics(Tier::CRITICAL, now).await;
        assert_eq!(metrics.backlog_depth, 0);
        assert_eq!(metrics.delayed_count, 1);

        let later = now + ChronoDuration::seconds(5);
        assert_eq!(router.dequeue_at(Tier::CRITICAL, later).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_remove_pending_task() {
        let router = PriorityQueueRouter::default();
        let now = Utc::now();
        let ready = task(3, now);
        let delayed = task(4, now);
        let (ready_id, delayed_id) = (ready.id, delayed.id);
        router.enqueue_at(ready, now).await.unwrap();
        router
            .enqueue_delayed(delayed, now + ChronoDuration::seconds(30))
            .await;

        assert_eq!(router.remove(ready_id).await.unwrap().id, ready_id);
        assert_eq!(router.remove(delayed_id).await.unwrap().id, delayed_id);
        assert!(router.remove(ready_id).await.is_none());
        assert!(router.is_empty().await);
    }

    #[tokio::test]
    async fn test_metrics_report_oldest_age_and_head() {
        let router = PriorityQueueRouter::default();
        let now = Utc::now();
        router
            .enqueue_at(task(2, now - ChronoDuration::seconds(120)), now)
            .await
            .unwrap();
        router.enqueue_at(task(2, now), now).await.unwrap();

        let metrics = router.metrics(Tier::new(2).unwrap(), now).await;
        assert_eq!(metrics.backlog_depth, 2);
        assert_eq!(metrics.oldest_pending_age_seconds, Some(120));
        // 等待120秒获得两个步长的年龄加成
        assert_eq!(metrics.head_score, Some(2 * 10_000 - 20));
    }
}

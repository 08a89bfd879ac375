use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use taskqueue_core::models::{LedgerFilter, LedgerHead, TaskId, Transition};
use taskqueue_core::traits::{LedgerAppendError, LedgerStore};
use taskqueue_core::SchedulerResult;
use tokio::sync::RwLock;
use tracing::debug;

/// 内存账本存储
///
/// 适用于嵌入式部署与测试。所有写入在同一把写锁内完成版本检查与去重，
/// 进程重启后数据丢失。
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    /// 按写入顺序保存的全部转换记录
    transitions: Vec<Transition>,
    heads: HashMap<TaskId, LedgerHead>,
    dedup_keys: HashSet<String>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前记录总数
    pub async fn len(&self) -> usize {
        self.inner.read().await.transitions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn head(&self, task_id: TaskId) -> SchedulerResult<Option<LedgerHead>> {
        Ok(self.inner.read().await.heads.get(&task_id).copied())
    }

    async fn append(&self, transition: &Transition) -> Result<(), LedgerAppendError> {
        let mut state = self.inner.write().await;

        let key = transition.dedup_key();
        if state.dedup_keys.contains(&key) {
            return Err(LedgerAppendError::Duplicate { key });
        }

        let current = state
            .heads
            .get(&transition.task_id)
            .map(|head| head.version)
            .unwrap_or(0);
        if transition.version != current + 1 {
            return Err(LedgerAppendError::Conflict {
                expected: transition.version,
                actual: current,
            });
        }

        state.heads.insert(
            transition.task_id,
            LedgerHead {
                version: transition.version,
                status: transition.to,
            },
        );
        state.dedup_keys.insert(key);
        state.transitions.push(transition.clone());

        debug!(
            "账本追加: 任务 {} v{} {:?} -> {}",
            transition.task_id, transition.version, transition.from, transition.to
        );
        Ok(())
    }

    async fn contains(&self, dedup_key: &str) -> SchedulerResult<bool> {
        Ok(self.inner.read().await.dedup_keys.contains(dedup_key))
    }

    async fn query(&self, filter: &LedgerFilter) -> SchedulerResult<Vec<Transition>> {
        let state = self.inner.read().await;
        let mut result: Vec<Transition> = state
            .transitions
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        // 稳定排序，同一时刻的记录保持写入顺序
        result.sort_by_key(|t| t.recorded_at);
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use taskqueue_core::models::TaskStatus;

    fn submitted(task_id: TaskId) -> Transition {
        Transition {
            task_id,
            version: 1,
            from: None,
            to: TaskStatus::Pending,
            attempt: 0,
            delivery: 0,
            worker_id: None,
            reason: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_head() {
        let store = InMemoryLedgerStore::new();
        let task_id = TaskId::new();
        assert!(store.head(task_id).await.unwrap().is_none());

        store.append(&submitted(task_id)).await.unwrap();
        let head = store.head(task_id).await.unwrap().unwrap();
        assert_eq!(head.version, 1);
        assert_eq!(head.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_version_conflict() {
        let store = InMemoryLedgerStore::new();
        let task_id = TaskId::new();
        store.append(&submitted(task_id)).await.unwrap();

        let mut stale = submitted(task_id);
        stale.from = Some(TaskStatus::Pending);
        stale.to = TaskStatus::Leased;
        stale.delivery = 1;
        stale.version = 1;
        match store.append(&stale).await {
            Err(LedgerAppendError::Conflict { expected, actual }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 1);
            }
            other => panic!("期望版本冲突，实际: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let store = InMemoryLedgerStore::new();
        let task_id = TaskId::new();
        let transition = submitted(task_id);
        store.append(&transition).await.unwrap();

        assert!(store.contains(&transition.dedup_key()).await.unwrap());
        assert!(matches!(
            store.append(&transition).await,
            Err(LedgerAppendError::Duplicate { .. })
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        let a = TaskId::new();
        let b = TaskId::new();

        let mut later = submitted(a);
        later.recorded_at = now + Duration::seconds(10);
        let mut earlier = submitted(b);
        earlier.recorded_at = now;
        store.append(&later).await.unwrap();
        store.append(&earlier).await.unwrap();

        let all = store.query(&LedgerFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].task_id, b);

        let only_a = store.query(&LedgerFilter::for_task(a)).await.unwrap();
        assert_eq!(only_a.len(), 1);

        let limited = store
            .query(&LedgerFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
